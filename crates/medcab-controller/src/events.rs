//! Notifications to the host.
//!
//! The controller reports through an [`EventSink`]. Delivery is
//! best-effort: a sink must never fail the hardware operation that
//! produced the event, so [`EventSink::emit`] has no error path.
//! [`EventBus`] fans events out over a `tokio::sync::broadcast` channel.

use medcab_protocol::FirmwareVersion;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::error::ReasonCode;
use crate::phase::ControllerPhase;

const EVENT_BUS_CAPACITY: usize = 256;

/// Hardware lock state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotState {
    pub slot_id: u8,
    pub locked: bool,
}

/// Named event with its payload. Serializes as
/// `{"event": "<name>", ...payload}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum CabinetEvent {
    /// Load workflow progress: once when the slot opens, once when it is
    /// locked back.
    Unlocking {
        operation_id: Uuid,
        slot_id: u8,
        record_id: String,
        locked_back: bool,
    },
    /// Dispense workflow progress, same shape as `Unlocking`.
    Dispensing {
        operation_id: Uuid,
        slot_id: u8,
        record_id: String,
        locked_back: bool,
    },
    /// Status answered while idle.
    InitRes { slots: Vec<SlotState> },
    Version(FirmwareVersion),
    SlotReset { slot_id: u8 },
    /// Workflow state cleared by a deactivate or reactivate.
    DeviceStateReset {
        slot_id: u8,
        active: bool,
        previous_phase: ControllerPhase,
    },
    EmergencyDisconnect {
        cancelled_commands: usize,
        previous_phase: ControllerPhase,
    },
    Connected { attempts: u32 },
    ConnectionLost,
    OperationFailed {
        process: String,
        slot_id: Option<i64>,
        reason: ReasonCode,
        message: String,
    },
}

impl CabinetEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unlocking { .. } => "unlocking",
            Self::Dispensing { .. } => "dispensing",
            Self::InitRes { .. } => "init-res",
            Self::Version(_) => "version",
            Self::SlotReset { .. } => "slot-reset",
            Self::DeviceStateReset { .. } => "device-state-reset",
            Self::EmergencyDisconnect { .. } => "emergency-disconnect",
            Self::Connected { .. } => "connected",
            Self::ConnectionLost => "connection-lost",
            Self::OperationFailed { .. } => "operation-failed",
        }
    }
}

/// Receiver of controller events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CabinetEvent);
}

/// Broadcast fan-out. Events sent with no subscriber are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CabinetEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CabinetEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: CabinetEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            trace!(event = name, "No event subscribers");
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: CabinetEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<CabinetEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CabinetEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn named(&self, name: &str) -> Vec<CabinetEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name() == name)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: CabinetEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
