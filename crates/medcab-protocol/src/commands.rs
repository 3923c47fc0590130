//! Command and ASK status codes of the cabinet protocol.
//!
//! Commands are device-family agnostic here; the opcode byte that goes on
//! the wire for each one is owned by a [`DeviceProfile`](crate::DeviceProfile).
//! ASK codes are shared by every family.
//!
//! # Wire Format
//!
//! ```text
//! STX  ADDR  LOCKNUM  CMD  ASK  DATALEN  ETX  SUM
//!                     ^^^  ^^^
//!                     |    AskStatus (0x00 in requests)
//!                     Command opcode
//! ```
//!
//! # Examples
//!
//! ```
//! use medcab_protocol::{AskStatus, Command};
//!
//! assert_eq!(Command::UnlockSlot.as_str(), "UNLOCK_SLOT");
//!
//! let ask = AskStatus::parse(0x10).unwrap();
//! assert!(ask.is_success());
//! assert_eq!(ask.to_u8(), 0x10);
//!
//! assert!(AskStatus::parse(0x42).is_err());
//! ```

use medcab_core::constants::{
    ASK_DATA_VERIFICATION_FAILED, ASK_DEFAULT, ASK_FAILED, ASK_SUCCESS, ASK_TIMEOUT,
    ASK_UNKNOWN_COMMAND,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;

/// Commands understood by the cabinet board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    StatusRequest,
    UnlockSlot,
    LockAll,
    ResetSystem,
    GetVersion,
    SetConfig,
}

impl Command {
    /// Every command, in opcode order.
    pub const ALL: [Command; 6] = [
        Command::StatusRequest,
        Command::UnlockSlot,
        Command::LockAll,
        Command::ResetSystem,
        Command::GetVersion,
        Command::SetConfig,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::StatusRequest => "STATUS_REQUEST",
            Command::UnlockSlot => "UNLOCK_SLOT",
            Command::LockAll => "LOCK_ALL",
            Command::ResetSystem => "RESET_SYSTEM",
            Command::GetVersion => "GET_VERSION",
            Command::SetConfig => "SET_CONFIG",
        }
    }

    /// Returns `true` if the `LOCKNUM` byte selects a slot for this command.
    #[inline]
    pub fn targets_slot(&self) -> bool {
        matches!(self, Self::UnlockSlot)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result code carried in the `ASK` byte of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AskStatus {
    /// Requests carry this value; the board never answers with it.
    Default,
    Success,
    Failed,
    Timeout,
    UnknownCommand,
    DataVerificationFailed,
}

impl AskStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            ASK_DEFAULT => Some(Self::Default),
            ASK_SUCCESS => Some(Self::Success),
            ASK_FAILED => Some(Self::Failed),
            ASK_TIMEOUT => Some(Self::Timeout),
            ASK_UNKNOWN_COMMAND => Some(Self::UnknownCommand),
            ASK_DATA_VERIFICATION_FAILED => Some(Self::DataVerificationFailed),
            _ => None,
        }
    }

    /// Decode an `ASK` byte.
    ///
    /// # Errors
    /// Returns [`ProtocolError::UnknownAsk`] for bytes outside the table.
    pub fn parse(byte: u8) -> Result<Self, ProtocolError> {
        Self::from_byte(byte).ok_or(ProtocolError::UnknownAsk(byte))
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Default => ASK_DEFAULT,
            Self::Success => ASK_SUCCESS,
            Self::Failed => ASK_FAILED,
            Self::Timeout => ASK_TIMEOUT,
            Self::UnknownCommand => ASK_UNKNOWN_COMMAND,
            Self::DataVerificationFailed => ASK_DATA_VERIFICATION_FAILED,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::UnknownCommand => "UNKNOWN_COMMAND",
            Self::DataVerificationFailed => "DATA_VERIFICATION_FAILED",
        }
    }
}

impl fmt::Display for AskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
