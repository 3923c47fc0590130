//! Operation errors and their stable reason codes.
//!
//! Every failure leaving the controller carries a [`ReasonCode`]: the
//! kebab-case string written to the audit trail and sent with
//! `operation-failed` events. Hosts match on the code, never on the
//! message text.

use medcab_hardware::TransportError;
use medcab_protocol::{AskStatus, FramingError, ProtocolError};
use medcab_storage::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::phase::ControllerPhase;

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, OperationError>;

/// Errors returned by controller operations.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("Slot {slot} out of range 1..={max}")]
    InvalidSlot { slot: i64, max: u8 },

    #[error("No authenticated user for the presented credential")]
    NoAuthenticatedUser,

    #[error("Slot {slot} is not occupied")]
    SlotNotOccupied { slot: u8 },

    #[error("Record id is missing")]
    MissingRecordId,

    #[error("Slot {slot} is deactivated")]
    SlotInactive { slot: u8 },

    #[error("Operation already in progress ({phase})")]
    OperationInProgress { phase: ControllerPhase },

    #[error("Cabinet not connected")]
    NotConnected,

    #[error("Cabinet rejected the command for slot {slot}: {ask}")]
    HardwareRejected { slot: u8, ask: AskStatus },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Protocol(ProtocolError),

    #[error(transparent)]
    Config(medcab_core::Error),
}

impl OperationError {
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::InvalidSlot { .. } => ReasonCode::InvalidSlot,
            Self::NoAuthenticatedUser => ReasonCode::NotAuthenticated,
            Self::SlotNotOccupied { .. } => ReasonCode::NotOccupied,
            Self::MissingRecordId => ReasonCode::MissingRecordId,
            Self::SlotInactive { .. } => ReasonCode::SlotInactive,
            Self::OperationInProgress { .. } => ReasonCode::OperationInProgress,
            Self::NotConnected => ReasonCode::NotConnected,
            Self::HardwareRejected { .. } => ReasonCode::HardwareRejected,
            Self::Transport(TransportError::Cancelled) => ReasonCode::Cancelled,
            Self::Transport(_) => ReasonCode::TransportError,
            Self::Storage(_) => ReasonCode::StorageError,
            Self::Protocol(e) => ReasonCode::for_protocol(e),
            Self::Config(_) => ReasonCode::Configuration,
        }
    }
}

impl From<ProtocolError> for OperationError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::InvalidSlot { slot, max } => Self::InvalidSlot { slot, max },
            ProtocolError::Domain(e) => e.into(),
            other => Self::Protocol(other),
        }
    }
}

impl From<medcab_core::Error> for OperationError {
    fn from(error: medcab_core::Error) -> Self {
        match error {
            medcab_core::Error::InvalidSlot { slot, max } => Self::InvalidSlot { slot, max },
            medcab_core::Error::InvalidRecordId(_) => Self::MissingRecordId,
            medcab_core::Error::InvalidCredential(_) => Self::NoAuthenticatedUser,
            other => Self::Config(other),
        }
    }
}

/// Stable, enumerable failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    InvalidSlot,
    NotAuthenticated,
    NotOccupied,
    MissingRecordId,
    SlotInactive,
    OperationInProgress,
    NotConnected,
    HardwareRejected,
    Cancelled,
    TransportError,
    StorageError,
    ChecksumMismatch,
    MalformedPacket,
    UnexpectedResponse,
    PacketTimeout,
    FramingDiscard,
    ConnectionLost,
    Configuration,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSlot => "invalid-slot",
            Self::NotAuthenticated => "not-authenticated",
            Self::NotOccupied => "not-occupied",
            Self::MissingRecordId => "missing-record-id",
            Self::SlotInactive => "slot-inactive",
            Self::OperationInProgress => "operation-in-progress",
            Self::NotConnected => "not-connected",
            Self::HardwareRejected => "hardware-rejected",
            Self::Cancelled => "cancelled",
            Self::TransportError => "transport-error",
            Self::StorageError => "storage-error",
            Self::ChecksumMismatch => "checksum-mismatch",
            Self::MalformedPacket => "malformed-packet",
            Self::UnexpectedResponse => "unexpected-response",
            Self::PacketTimeout => "packet-timeout",
            Self::FramingDiscard => "framing-discard",
            Self::ConnectionLost => "connection-lost",
            Self::Configuration => "configuration",
        }
    }

    pub fn for_protocol(error: &ProtocolError) -> Self {
        match error {
            ProtocolError::ChecksumMismatch { .. } => Self::ChecksumMismatch,
            ProtocolError::UnexpectedForPhase { .. }
            | ProtocolError::UnknownCommand(_)
            | ProtocolError::UnknownAsk(_) => Self::UnexpectedResponse,
            ProtocolError::InvalidSlot { .. } => Self::InvalidSlot,
            _ => Self::MalformedPacket,
        }
    }

    pub fn for_framing(error: &FramingError) -> Self {
        match error {
            FramingError::Timeout { .. } => Self::PacketTimeout,
            _ => Self::FramingDiscard,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
