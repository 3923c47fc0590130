//! The cabinet controller.
//!
//! [`CabinetController`] owns the connection, the command sequencer and
//! the workflow state. Two background tasks run beside the public
//! operations:
//!
//! - the dispatch task takes every [`LinkEvent`] from the reader, parses
//!   packets and routes each response to exactly one handler chosen by
//!   its command and the current phase
//! - the poll task enqueues a status request at the poll interval while a
//!   slot is waiting to be locked back
//!
//! Phase and context live behind one async mutex. Public operations and
//! the dispatch task are the only writers, and an operation holds the
//! lock from its phase check until its command is on the wire, so a
//! response can never be dispatched against a half-started workflow.
//!
//! Operations are fire-and-continue: `unlock` and `dispense` return once
//! the command is written. Progress arrives as [`CabinetEvent`]s.

use medcab_core::{Credential, RecordId, SlotId};
use medcab_hardware::{
    CommandSequencer, ConnectReport, ConnectionManager, HealthReport, LinkEvent, SerialLink,
    TransportError,
};
use medcab_protocol::bits::to_hex;
use medcab_protocol::{
    AnyDeviceProfile, Command, DeviceProfile, FramingError, Packet, ParsedResponse,
    ProtocolError, ResponsePayload,
};
use medcab_storage::{
    CabinetStore, SlotRecord, SlotRepository, SlotUpdate, StorageError, UserRecord,
    UserRepository,
};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::audit::{Attempt, AuditRecorder};
use crate::config::ControllerConfig;
use crate::context::{OperationContext, OperationKind};
use crate::error::{OperationError, ReasonCode, Result};
use crate::events::{CabinetEvent, EventSink, SlotState};
use crate::phase::{ControllerPhase, PhaseMachine, PhaseTransition};

struct State {
    machine: PhaseMachine,
    context: Option<OperationContext>,
}

struct Inner<L: SerialLink, S: CabinetStore> {
    config: ControllerConfig,
    profile: AnyDeviceProfile,
    connection: Arc<ConnectionManager<L>>,
    sequencer: CommandSequencer<L>,
    store: Arc<S>,
    audit: AuditRecorder<S>,
    events: Arc<dyn EventSink>,
    state: Mutex<State>,
    shutdown: CancellationToken,
}

/// Controller of one cabinet board.
///
/// # Examples
///
/// ```no_run
/// use medcab_controller::{CabinetController, ControllerConfig, EventBus};
/// use medcab_core::Credential;
/// use medcab_hardware::SerialPortLink;
/// use medcab_storage::{Database, DatabaseConfig, SqliteStore};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = SqliteStore::new(Database::new(DatabaseConfig::new("medcab.db")).await?);
/// let bus = EventBus::new();
/// let mut events = bus.subscribe();
///
/// let config = ControllerConfig::default().with_port("/dev/ttyUSB0");
/// let controller = CabinetController::new(SerialPortLink, store, Arc::new(bus), config)?;
/// controller.initialize().await?;
///
/// let credential = Credential::new("4821")?;
/// controller.unlock(3, "HN1", &credential).await?;
///
/// while let Ok(event) = events.recv().await {
///     println!("{}", serde_json::to_string(&event)?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct CabinetController<L: SerialLink, S: CabinetStore> {
    inner: Arc<Inner<L, S>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl<L: SerialLink, S: CabinetStore> CabinetController<L, S> {
    /// Build the controller and start its dispatch and poll tasks.
    /// Requires a Tokio runtime. The channel is not opened until
    /// [`initialize`](Self::initialize).
    ///
    /// # Errors
    /// [`OperationError::Config`] if `config` does not validate.
    pub fn new(
        link: L,
        store: S,
        events: Arc<dyn EventSink>,
        config: ControllerConfig,
    ) -> Result<Self> {
        config.validate()?;

        let profile = AnyDeviceProfile::for_kind(config.device_kind);
        let (manager, link_events) =
            ConnectionManager::new(link, config.serial.clone(), config.connection.clone());
        let connection = Arc::new(manager);
        let sequencer = CommandSequencer::new(Arc::clone(&connection));
        let store = Arc::new(store);

        let inner = Arc::new(Inner {
            config,
            profile,
            connection,
            sequencer,
            audit: AuditRecorder::new(Arc::clone(&store)),
            store,
            events,
            state: Mutex::new(State {
                machine: PhaseMachine::new(),
                context: None,
            }),
            shutdown: CancellationToken::new(),
        });

        let tasks = vec![
            tokio::spawn(dispatch_loop(Arc::clone(&inner), link_events)),
            tokio::spawn(poll_loop(Arc::clone(&inner))),
        ];

        Ok(Self {
            inner,
            tasks: StdMutex::new(tasks),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn profile(&self) -> &AnyDeviceProfile {
        &self.inner.profile
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn health(&self) -> HealthReport {
        self.inner.sequencer.health()
    }

    pub async fn phase(&self) -> ControllerPhase {
        self.inner.state.lock().await.machine.phase()
    }

    /// The workflow in progress, if any.
    pub async fn context(&self) -> Option<OperationContext> {
        self.inner.state.lock().await.context.clone()
    }

    /// Recent phase transitions, oldest first.
    pub async fn phase_history(&self) -> Vec<PhaseTransition> {
        self.inner
            .state
            .lock()
            .await
            .machine
            .history()
            .cloned()
            .collect()
    }

    /// Provision slot rows, open the channel with backoff, and request an
    /// initial status (answered as an `init-res` event).
    ///
    /// # Errors
    /// [`TransportError::RetriesExhausted`] if every connect attempt
    /// failed, or a storage error while provisioning.
    pub async fn initialize(&self) -> Result<ConnectReport> {
        let attempt = Attempt::new("initialize");
        let result = self.inner.initialize().await;
        self.inner
            .conclude(&attempt, &result, || {
                format!("cabinet {} initialized", self.inner.profile.kind())
            })
            .await;
        result
    }

    /// Open `slot_id` to load medication for `record_id`.
    ///
    /// Returns once the unlock command is written. The slot then moves
    /// through `Unlocking` and `AwaitingLockBack`; when the board reports
    /// it locked again the slot is marked occupied.
    pub async fn unlock(
        &self,
        slot_id: i64,
        record_id: &str,
        credential: &Credential,
    ) -> Result<()> {
        let mut attempt = Attempt::new("unlock").slot(slot_id).record(record_id);
        let result = self
            .inner
            .begin(OperationKind::Unlock, slot_id, record_id, credential, &mut attempt)
            .await;
        self.inner
            .conclude(&attempt, &result, || format!("unlock sent for slot {slot_id}"))
            .await;
        result
    }

    /// Open an occupied `slot_id` for pickup. Same contract as
    /// [`unlock`](Self::unlock); lock-back marks the slot empty.
    pub async fn dispense(
        &self,
        slot_id: i64,
        record_id: &str,
        credential: &Credential,
    ) -> Result<()> {
        let mut attempt = Attempt::new("dispense").slot(slot_id).record(record_id);
        let result = self
            .inner
            .begin(OperationKind::Dispense, slot_id, record_id, credential, &mut attempt)
            .await;
        self.inner
            .conclude(&attempt, &result, || format!("dispense sent for slot {slot_id}"))
            .await;
        result
    }

    /// Clear occupancy and record id of a slot. No hardware command.
    pub async fn reset_slot(&self, slot_id: i64, credential: &Credential) -> Result<()> {
        let mut attempt = Attempt::new("reset").slot(slot_id);
        let result = self.inner.reset_slot(slot_id, credential, &mut attempt).await;
        self.inner
            .conclude(&attempt, &result, || format!("slot {slot_id} reset"))
            .await;
        result
    }

    /// Take a slot out of service. Also clears whatever workflow was in
    /// progress.
    pub async fn deactivate(&self, slot_id: i64, credential: &Credential) -> Result<()> {
        self.set_active(slot_id, credential, false).await
    }

    /// Return a slot to service. Also clears whatever workflow was in
    /// progress.
    pub async fn reactivate(&self, slot_id: i64, credential: &Credential) -> Result<()> {
        self.set_active(slot_id, credential, true).await
    }

    async fn set_active(&self, slot_id: i64, credential: &Credential, active: bool) -> Result<()> {
        let process = if active { "reactivate" } else { "deactivate" };
        let mut attempt = Attempt::new(process).slot(slot_id);
        let result = self
            .inner
            .set_active(slot_id, credential, active, &mut attempt)
            .await;
        self.inner
            .conclude(&attempt, &result, || format!("slot {slot_id} {process}d"))
            .await;
        result
    }

    /// Send STATUS_REQUEST. Slot states arrive through dispatch.
    pub async fn status_request(&self) -> Result<()> {
        let packet = self
            .inner
            .profile
            .build_status_request(self.inner.config.address());
        self.inner.send_query("status-request", packet).await
    }

    /// Send GET_VERSION. The answer is emitted as a `version` event.
    pub async fn get_version(&self) -> Result<()> {
        let packet = self
            .inner
            .profile
            .build_get_version(self.inner.config.address());
        self.inner.send_query("get-version", packet).await
    }

    /// Drop every queued command, force-close the channel and clear the
    /// workflow. Safe from any phase and idempotent.
    pub async fn emergency_stop(&self) {
        let inner = &self.inner;
        let cancelled = inner.sequencer.emergency_stop().await;

        let mut state = inner.state.lock().await;
        let previous_phase = state.machine.reset("emergency disconnect");
        let dropped = state.context.take();
        drop(state);

        let mut attempt = Attempt::new("emergency-disconnect");
        if let Some(context) = dropped {
            attempt = attempt.slot(i64::from(context.slot.get()));
            inner.clear_opening(context.slot).await;
        }
        inner.events.emit(CabinetEvent::EmergencyDisconnect {
            cancelled_commands: cancelled,
            previous_phase,
        });
        inner
            .audit
            .success(
                &attempt,
                format!("emergency disconnect from {previous_phase}, {cancelled} commands dropped"),
            )
            .await;
    }

    /// Close the channel gracefully. The controller stays usable;
    /// [`initialize`](Self::initialize) reconnects.
    pub async fn disconnect(&self) {
        self.inner.connection.disconnect().await;
    }

    /// Stop the background tasks and close the channel.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.sequencer.shutdown().await;
        self.inner.connection.disconnect().await;

        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }

        let mut state = self.inner.state.lock().await;
        state.machine.reset("shutdown");
        state.context = None;
        info!("Controller stopped");
    }
}

impl<L: SerialLink, S: CabinetStore> Drop for CabinetController<L, S> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl<L: SerialLink, S: CabinetStore> Inner<L, S> {
    /// Audit the outcome and report failures to the host.
    async fn conclude<T>(
        &self,
        attempt: &Attempt,
        result: &Result<T>,
        success_message: impl FnOnce() -> String,
    ) {
        if let Err(e) = result {
            self.events.emit(CabinetEvent::OperationFailed {
                process: attempt.process().to_string(),
                slot_id: attempt.slot_id(),
                reason: e.reason_code(),
                message: e.to_string(),
            });
        }
        self.audit.finish(attempt, result, success_message).await;
    }

    async fn initialize(&self) -> Result<ConnectReport> {
        self.store.ensure_slots(self.profile.slot_count()).await?;

        let report = self.connection.connect_with_protection().await;
        if !report.success {
            return Err(TransportError::RetriesExhausted {
                attempts: report.attempts,
                message: report.last_error.unwrap_or_default(),
            }
            .into());
        }

        self.events.emit(CabinetEvent::Connected {
            attempts: report.attempts,
        });
        drop(
            self.sequencer
                .enqueue(self.profile.build_status_request(self.config.address())),
        );
        Ok(report)
    }

    async fn authenticate(
        &self,
        credential: &Credential,
        attempt: &mut Attempt,
    ) -> Result<UserRecord> {
        let user = self
            .store
            .find_user(credential)
            .await?
            .ok_or(OperationError::NoAuthenticatedUser)?;
        attempt.set_user(user.id);
        Ok(user)
    }

    fn slot(&self, slot_id: i64) -> Result<SlotId> {
        Ok(SlotId::new(slot_id, self.profile.slot_count())?)
    }

    async fn slot_record(&self, slot: SlotId) -> Result<SlotRecord> {
        let slot_id = i64::from(slot.get());
        let record = self
            .store
            .find_slot(slot_id)
            .await?
            .ok_or_else(|| StorageError::not_found("Slot", "slot_id", slot_id))?;
        Ok(record)
    }

    async fn begin(
        &self,
        kind: OperationKind,
        slot_id: i64,
        record_id: &str,
        credential: &Credential,
        attempt: &mut Attempt,
    ) -> Result<()> {
        let user = self.authenticate(credential, attempt).await?;
        let slot = self.slot(slot_id)?;
        let record = self.slot_record(slot).await?;

        if !record.active {
            return Err(OperationError::SlotInactive { slot: slot.get() });
        }
        if kind == OperationKind::Dispense {
            if !record.occupied {
                return Err(OperationError::SlotNotOccupied { slot: slot.get() });
            }
            if record.record_id().is_none() {
                return Err(OperationError::MissingRecordId);
            }
        }
        let record_id = RecordId::new(record_id)?;

        if !self.connection.is_connected() {
            return Err(OperationError::NotConnected);
        }
        let packet = self.profile.build_unlock(self.config.address(), slot_id)?;

        let mut state = self.state.lock().await;
        let current = state.machine.phase();
        if !current.is_idle() {
            return Err(OperationError::OperationInProgress { phase: current });
        }

        let next = match kind {
            OperationKind::Unlock => ControllerPhase::Unlocking,
            OperationKind::Dispense => ControllerPhase::Dispensing,
        };
        if let Err(e) = state.machine.transition(next, kind.as_str()) {
            return Err(OperationError::OperationInProgress { phase: e.from });
        }
        let context = OperationContext::new(kind, slot, record_id, user.id);
        info!(
            operation_id = %context.id,
            slot_id = %slot,
            kind = %kind,
            user_id = user.id,
            "Operation started"
        );
        state.context = Some(context);

        if let Err(e) = self
            .store
            .update_slot(i64::from(slot.get()), &SlotUpdate::opening(true))
            .await
        {
            warn!(slot_id = %slot, error = %e, "Failed to flag slot as opening");
        }

        if let Err(e) = self.sequencer.send(packet).await {
            state.machine.reset("write failed");
            state.context = None;
            drop(state);
            self.clear_opening(slot).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn reset_slot(
        &self,
        slot_id: i64,
        credential: &Credential,
        attempt: &mut Attempt,
    ) -> Result<()> {
        self.authenticate(credential, attempt).await?;
        let slot = self.slot(slot_id)?;
        self.store
            .update_slot(i64::from(slot.get()), &SlotUpdate::emptied())
            .await?;
        self.events.emit(CabinetEvent::SlotReset { slot_id: slot.get() });
        Ok(())
    }

    async fn set_active(
        &self,
        slot_id: i64,
        credential: &Credential,
        active: bool,
        attempt: &mut Attempt,
    ) -> Result<()> {
        self.authenticate(credential, attempt).await?;
        let slot = self.slot(slot_id)?;

        let mut state = self.state.lock().await;
        let previous_phase = state
            .machine
            .reset(if active { "reactivate" } else { "deactivate" });
        let dropped = state.context.take();
        drop(state);

        if !previous_phase.is_idle() {
            let cancelled = self.sequencer.cancel_pending();
            debug!(%previous_phase, cancelled, "Workflow cleared");
        }
        // The target slot's own flag is cleared by the activity update below
        if let Some(context) = dropped.filter(|c| c.slot != slot) {
            self.clear_opening(context.slot).await;
        }

        self.store
            .update_slot(i64::from(slot.get()), &SlotUpdate::active(active))
            .await?;
        self.events.emit(CabinetEvent::DeviceStateReset {
            slot_id: slot.get(),
            active,
            previous_phase,
        });
        Ok(())
    }

    async fn send_query(&self, process: &'static str, packet: Packet) -> Result<()> {
        let result = if self.connection.is_connected() {
            self.sequencer.send(packet).await.map_err(OperationError::from)
        } else {
            Err(OperationError::NotConnected)
        };
        // Routine queries are only audited when they fail
        if result.is_err() {
            self.conclude(&Attempt::new(process), &result, String::new)
                .await;
        }
        result
    }

    async fn clear_opening(&self, slot: SlotId) {
        if let Err(e) = self
            .store
            .update_slot(i64::from(slot.get()), &SlotUpdate::opening(false))
            .await
        {
            warn!(slot_id = %slot, error = %e, "Failed to clear opening flag");
        }
    }

    async fn on_packet(&self, bytes: &[u8]) {
        let response = match self.profile.parse_response(bytes) {
            Ok(response) => response,
            Err(e) => {
                self.audit
                    .failure(
                        &Attempt::new("protocol-error"),
                        ReasonCode::for_protocol(&e),
                        format!("{e} [{}]", to_hex(bytes)),
                    )
                    .await;
                return;
            }
        };
        trace!(command = %response.command, ask = %response.ask, "Response received");
        self.sequencer.response_received(response.packet.command);

        let mut state = self.state.lock().await;
        let phase = state.machine.phase();
        match response.command {
            Command::UnlockSlot => match state.context.as_ref().map(|c| c.kind) {
                Some(OperationKind::Unlock) => self.on_load_unlock_ack(&mut state, &response).await,
                Some(OperationKind::Dispense) => {
                    self.on_dispense_unlock_ack(&mut state, &response).await
                }
                None => self.on_unexpected(phase, &response, None).await,
            },
            Command::StatusRequest => match phase {
                ControllerPhase::Idle => self.on_idle_status(&response),
                ControllerPhase::AwaitingLockBack => {
                    self.on_load_lock_back(&mut state, &response).await
                }
                ControllerPhase::AwaitingDispenseLockBack => {
                    self.on_pickup_lock_back(&mut state, &response).await
                }
                ControllerPhase::Unlocking | ControllerPhase::Dispensing => {
                    trace!(%phase, "Status ignored until the unlock is acknowledged");
                }
            },
            Command::GetVersion => self.on_version(&response),
            other => debug!(command = %other, ask = %response.ask, "Acknowledged"),
        }
    }

    /// The acknowledged context, if the ack fits the phase and slot.
    async fn acknowledged(
        &self,
        state: &State,
        response: &ParsedResponse,
        expected: ControllerPhase,
    ) -> Option<OperationContext> {
        let context = state.context.clone()?;
        let phase = state.machine.phase();
        if phase != expected || response.packet.lock_num != context.slot.lock_num() {
            self.on_unexpected(phase, response, Some(&context)).await;
            return None;
        }
        Some(context)
    }

    async fn on_load_unlock_ack(&self, state: &mut MutexGuard<'_, State>, response: &ParsedResponse) {
        let Some(context) = self
            .acknowledged(state, response, ControllerPhase::Unlocking)
            .await
        else {
            return;
        };
        if !response.unlock_success() {
            self.abort_rejected(state, &context, response).await;
            return;
        }

        if let Err(e) = state
            .machine
            .transition(ControllerPhase::AwaitingLockBack, "unlock acknowledged")
        {
            warn!(error = %e, "Phase transition refused");
            return;
        }
        info!(operation_id = %context.id, slot_id = %context.slot, "Slot open for loading");
        self.events.emit(CabinetEvent::Unlocking {
            operation_id: context.id,
            slot_id: context.slot.get(),
            record_id: context.record_id.to_string(),
            locked_back: false,
        });
        self.audit
            .success(
                &attempt_for(&context, "unlock-ack"),
                format!("slot {} opened for loading", context.slot),
            )
            .await;
    }

    async fn on_dispense_unlock_ack(
        &self,
        state: &mut MutexGuard<'_, State>,
        response: &ParsedResponse,
    ) {
        let Some(context) = self
            .acknowledged(state, response, ControllerPhase::Dispensing)
            .await
        else {
            return;
        };
        if !response.unlock_success() {
            self.abort_rejected(state, &context, response).await;
            return;
        }

        if let Err(e) = state.machine.transition(
            ControllerPhase::AwaitingDispenseLockBack,
            "dispense acknowledged",
        ) {
            warn!(error = %e, "Phase transition refused");
            return;
        }
        info!(operation_id = %context.id, slot_id = %context.slot, "Slot open for pickup");
        self.events.emit(CabinetEvent::Dispensing {
            operation_id: context.id,
            slot_id: context.slot.get(),
            record_id: context.record_id.to_string(),
            locked_back: false,
        });
        self.audit
            .success(
                &attempt_for(&context, "dispense-ack"),
                format!("slot {} opened for pickup", context.slot),
            )
            .await;
    }

    /// End the workflow before its unlock was acknowledged.
    async fn abort(
        &self,
        state: &mut MutexGuard<'_, State>,
        context: &OperationContext,
        error: OperationError,
    ) {
        state.machine.reset("unlock not acknowledged");
        state.context = None;
        self.clear_opening(context.slot).await;

        warn!(operation_id = %context.id, error = %error, "Workflow aborted");
        self.events.emit(CabinetEvent::OperationFailed {
            process: context.kind.to_string(),
            slot_id: Some(i64::from(context.slot.get())),
            reason: error.reason_code(),
            message: error.to_string(),
        });
        self.audit
            .failure(
                &attempt_for(context, context.kind.as_str()),
                error.reason_code(),
                error.to_string(),
            )
            .await;
    }

    async fn abort_rejected(
        &self,
        state: &mut MutexGuard<'_, State>,
        context: &OperationContext,
        response: &ParsedResponse,
    ) {
        let error = OperationError::HardwareRejected {
            slot: context.slot.get(),
            ask: response.ask,
        };
        self.abort(state, context, error).await;
    }

    /// `Some(true)` once the context's slot reads locked.
    fn locked_back(&self, context: &OperationContext, response: &ParsedResponse) -> Option<bool> {
        let bit = *response.slot_bits()?.get(context.slot.index())?;
        Some(self.config.polarity.is_locked(bit))
    }

    async fn on_load_lock_back(&self, state: &mut MutexGuard<'_, State>, response: &ParsedResponse) {
        let Some(context) = state.context.clone() else {
            state.machine.reset("no operation context");
            return;
        };
        if self.locked_back(&context, response) != Some(true) {
            trace!(slot_id = %context.slot, "Waiting for lock-back");
            return;
        }

        state.machine.reset("locked back");
        state.context = None;
        let result = self
            .store
            .update_slot(
                i64::from(context.slot.get()),
                &SlotUpdate::loaded(context.record_id.as_str()),
            )
            .await
            .map_err(OperationError::from);

        self.events.emit(CabinetEvent::Unlocking {
            operation_id: context.id,
            slot_id: context.slot.get(),
            record_id: context.record_id.to_string(),
            locked_back: true,
        });
        self.audit
            .finish(&attempt_for(&context, "unlock"), &result, || {
                format!("slot {} loaded and locked back", context.slot)
            })
            .await;
    }

    async fn on_pickup_lock_back(
        &self,
        state: &mut MutexGuard<'_, State>,
        response: &ParsedResponse,
    ) {
        let Some(context) = state.context.clone() else {
            state.machine.reset("no operation context");
            return;
        };
        if self.locked_back(&context, response) != Some(true) {
            trace!(slot_id = %context.slot, "Waiting for lock-back after pickup");
            return;
        }

        state.machine.reset("locked back");
        state.context = None;
        let result = self
            .store
            .update_slot(i64::from(context.slot.get()), &SlotUpdate::emptied())
            .await
            .map_err(OperationError::from);

        self.events.emit(CabinetEvent::Dispensing {
            operation_id: context.id,
            slot_id: context.slot.get(),
            record_id: context.record_id.to_string(),
            locked_back: true,
        });
        self.audit
            .finish(&attempt_for(&context, "dispense-complete"), &result, || {
                format!("slot {} emptied and locked back", context.slot)
            })
            .await;
    }

    fn on_idle_status(&self, response: &ParsedResponse) {
        let Some(bits) = response.slot_bits() else {
            debug!(ask = %response.ask, "Status without slot data");
            return;
        };
        let slots = (1u8..)
            .zip(bits)
            .map(|(slot_id, &bit)| SlotState {
                slot_id,
                locked: self.config.polarity.is_locked(bit),
            })
            .collect();
        self.events.emit(CabinetEvent::InitRes { slots });
    }

    fn on_version(&self, response: &ParsedResponse) {
        match &response.payload {
            ResponsePayload::Version(version) => {
                info!(%version, "Firmware version");
                self.events.emit(CabinetEvent::Version(version.clone()));
            }
            _ => debug!(ask = %response.ask, "Version query not answered"),
        }
    }

    async fn on_unexpected(
        &self,
        phase: ControllerPhase,
        response: &ParsedResponse,
        context: Option<&OperationContext>,
    ) {
        let error = ProtocolError::UnexpectedForPhase {
            command: response.command.to_string(),
            ask: response.ask.to_string(),
            phase: phase.to_string(),
        };
        let attempt = match context {
            Some(context) => attempt_for(context, "unexpected-response"),
            None => Attempt::new("unexpected-response"),
        };
        self.audit
            .failure(&attempt, ReasonCode::for_protocol(&error), error.to_string())
            .await;
    }

    /// The sequencer gave up on a command. A lost unlock ack ends the
    /// workflow; anything else is only audited.
    async fn on_response_timeout(&self, opcode: u8, sends: u32) {
        let error = OperationError::from(TransportError::NoResponse { opcode, sends });
        let mut state = self.state.lock().await;
        let awaiting_ack = matches!(
            state.machine.phase(),
            ControllerPhase::Unlocking | ControllerPhase::Dispensing
        );
        if awaiting_ack
            && self.profile.command_for(opcode) == Some(Command::UnlockSlot)
            && let Some(context) = state.context.clone()
        {
            self.abort(&mut state, &context, error).await;
            return;
        }
        drop(state);

        warn!(opcode, sends, "Command unanswered");
        self.audit
            .failure(
                &Attempt::new("response-timeout"),
                error.reason_code(),
                error.to_string(),
            )
            .await;
    }

    async fn on_framing(&self, error: &FramingError) {
        let reason = ReasonCode::for_framing(error);
        self.audit
            .failure(&Attempt::new(reason.as_str()), reason, error.to_string())
            .await;
    }

    async fn on_closed(&self) {
        warn!("Cabinet connection lost");
        self.events.emit(CabinetEvent::ConnectionLost);
        self.audit
            .failure(
                &Attempt::new("connection-lost"),
                ReasonCode::ConnectionLost,
                "serial channel closed by peer",
            )
            .await;
    }
}

fn attempt_for(context: &OperationContext, process: &'static str) -> Attempt {
    let mut attempt = Attempt::new(process)
        .slot(i64::from(context.slot.get()))
        .record(context.record_id.as_str());
    attempt.set_user(context.user_id);
    attempt
}

async fn dispatch_loop<L: SerialLink, S: CabinetStore>(
    inner: Arc<Inner<L, S>>,
    mut link_events: mpsc::Receiver<LinkEvent>,
) {
    loop {
        let event = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            event = link_events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match event {
            LinkEvent::Packet(bytes) => inner.on_packet(&bytes).await,
            LinkEvent::Framing(error) => inner.on_framing(&error).await,
            LinkEvent::Closed => inner.on_closed().await,
            LinkEvent::ResponseTimeout { opcode, sends } => {
                inner.on_response_timeout(opcode, sends).await
            }
        }
    }
    debug!("Dispatch stopped");
}

async fn poll_loop<L: SerialLink, S: CabinetStore>(inner: Arc<Inner<L, S>>) {
    let mut ticker = tokio::time::interval(inner.config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let awaiting = inner.state.lock().await.machine.phase().awaits_lock_back();
        let idle_channel =
            inner.sequencer.in_flight().is_none() && inner.sequencer.queue_depth() == 0;
        if awaiting && idle_channel && inner.connection.is_connected() {
            trace!("Polling for lock-back");
            drop(
                inner
                    .sequencer
                    .enqueue(inner.profile.build_status_request(inner.config.address())),
            );
        }
    }
    debug!("Poll stopped");
}
