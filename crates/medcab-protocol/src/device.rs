//! Device-family capabilities.
//!
//! Everything that differs between cabinet families (slot count, opcode
//! table, size of the status bitmap) lives behind [`DeviceProfile`]. The
//! profile is chosen once from a [`DeviceKind`] via
//! [`AnyDeviceProfile::for_kind`]; callers never probe for optional
//! behavior at call time.
//!
//! # Examples
//!
//! ```
//! use medcab_core::DeviceAddress;
//! use medcab_protocol::{AnyDeviceProfile, Command, DeviceKind, DeviceProfile};
//!
//! let profile = AnyDeviceProfile::for_kind(DeviceKind::Ds12);
//! assert_eq!(profile.slot_count(), 12);
//! assert_eq!(profile.opcode(Command::GetVersion), 0x8F);
//!
//! let packet = profile.build_unlock(DeviceAddress::default(), 12).unwrap();
//! assert_eq!(packet.lock_num, 11);
//! ```

use medcab_core::constants::{
    DS12_SLOT_COUNT, DS12_STATUS_DATA_LENGTH, OPCODE_GET_VERSION, OPCODE_LOCK_ALL,
    OPCODE_RESET_SYSTEM, OPCODE_SET_CONFIG, OPCODE_STATUS_REQUEST, OPCODE_UNLOCK_SLOT,
};
use medcab_core::{DeviceAddress, SlotId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bits;
use crate::commands::Command;
use crate::error::ProtocolError;
use crate::packet::Packet;
use crate::response::{self, ParsedResponse};

/// Supported cabinet families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DeviceKind {
    #[default]
    #[serde(rename = "DS12")]
    Ds12,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Ds12 => "DS12",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meaning of a slot bit in a status response.
///
/// Must be confirmed against the hardware documentation of the installed
/// board; the same setting drives both the load and the pickup lock-back
/// checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockPolarity {
    #[default]
    SetBitMeansLocked,
    ClearBitMeansLocked,
}

impl LockPolarity {
    #[inline]
    pub fn is_locked(self, bit: bool) -> bool {
        match self {
            LockPolarity::SetBitMeansLocked => bit,
            LockPolarity::ClearBitMeansLocked => !bit,
        }
    }

    /// Bit value a board reports for a slot in the given lock state.
    #[inline]
    pub fn bit_for(self, locked: bool) -> bool {
        self.is_locked(locked)
    }
}

/// Capabilities of one cabinet family.
pub trait DeviceProfile: Send + Sync {
    fn kind(&self) -> DeviceKind;

    fn slot_count(&self) -> u8;

    /// Opcode byte sent for `command`.
    fn opcode(&self, command: Command) -> u8;

    /// Reverse of [`DeviceProfile::opcode`].
    fn command_for(&self, opcode: u8) -> Option<Command>;

    /// Data bytes carried by a successful status response.
    fn status_data_length(&self) -> usize;

    /// Data-less request for `command` addressed to `lock_num`.
    fn build_command(&self, address: DeviceAddress, lock_num: u8, command: Command) -> Packet {
        Packet::request(address, lock_num, self.opcode(command))
    }

    fn build_status_request(&self, address: DeviceAddress) -> Packet {
        self.build_command(address, 0, Command::StatusRequest)
    }

    /// Unlock request for a one-based slot id.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidSlot`] if the slot is outside `1..=slot_count`.
    fn build_unlock(&self, address: DeviceAddress, slot_id: i64) -> Result<Packet, ProtocolError> {
        let slot = SlotId::new(slot_id, self.slot_count())?;
        Ok(self.build_command(address, slot.lock_num(), Command::UnlockSlot))
    }

    fn build_get_version(&self, address: DeviceAddress) -> Packet {
        self.build_command(address, 0, Command::GetVersion)
    }

    /// Per-slot bits of a status response, index 0 being slot 1.
    ///
    /// # Errors
    /// [`ProtocolError::UnexpectedDataLength`] if `data` is not exactly
    /// [`DeviceProfile::status_data_length`] bytes.
    fn slot_states(&self, data: &[u8]) -> Result<Vec<bool>, ProtocolError> {
        let expected = self.status_data_length();
        if data.len() != expected {
            return Err(ProtocolError::UnexpectedDataLength {
                command: Command::StatusRequest.to_string(),
                expected,
                actual: data.len(),
            });
        }
        Ok(bits::assemble_slot_states(usize::from(self.slot_count()), data)?)
    }

    /// Validate raw bytes and interpret them for this family.
    ///
    /// # Errors
    /// Any framing error from [`Packet::parse`], or an interpretation error
    /// from [`response::interpret`].
    fn parse_response(&self, bytes: &[u8]) -> Result<ParsedResponse, ProtocolError> {
        response::interpret(self, Packet::parse(bytes)?)
    }
}

/// The 12-slot DS12 board.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ds12Profile;

impl DeviceProfile for Ds12Profile {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Ds12
    }

    fn slot_count(&self) -> u8 {
        DS12_SLOT_COUNT
    }

    fn opcode(&self, command: Command) -> u8 {
        match command {
            Command::StatusRequest => OPCODE_STATUS_REQUEST,
            Command::UnlockSlot => OPCODE_UNLOCK_SLOT,
            Command::LockAll => OPCODE_LOCK_ALL,
            Command::ResetSystem => OPCODE_RESET_SYSTEM,
            Command::GetVersion => OPCODE_GET_VERSION,
            Command::SetConfig => OPCODE_SET_CONFIG,
        }
    }

    fn command_for(&self, opcode: u8) -> Option<Command> {
        match opcode {
            OPCODE_STATUS_REQUEST => Some(Command::StatusRequest),
            OPCODE_UNLOCK_SLOT => Some(Command::UnlockSlot),
            OPCODE_LOCK_ALL => Some(Command::LockAll),
            OPCODE_RESET_SYSTEM => Some(Command::ResetSystem),
            OPCODE_GET_VERSION => Some(Command::GetVersion),
            OPCODE_SET_CONFIG => Some(Command::SetConfig),
            _ => None,
        }
    }

    fn status_data_length(&self) -> usize {
        DS12_STATUS_DATA_LENGTH
    }
}

/// Enum dispatch over the supported profiles.
///
/// A 16-slot family would add a variant here and its own profile type.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum AnyDeviceProfile {
    Ds12(Ds12Profile),
}

impl AnyDeviceProfile {
    pub fn for_kind(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Ds12 => AnyDeviceProfile::Ds12(Ds12Profile),
        }
    }
}

impl DeviceProfile for AnyDeviceProfile {
    fn kind(&self) -> DeviceKind {
        match self {
            AnyDeviceProfile::Ds12(p) => p.kind(),
        }
    }

    fn slot_count(&self) -> u8 {
        match self {
            AnyDeviceProfile::Ds12(p) => p.slot_count(),
        }
    }

    fn opcode(&self, command: Command) -> u8 {
        match self {
            AnyDeviceProfile::Ds12(p) => p.opcode(command),
        }
    }

    fn command_for(&self, opcode: u8) -> Option<Command> {
        match self {
            AnyDeviceProfile::Ds12(p) => p.command_for(opcode),
        }
    }

    fn status_data_length(&self) -> usize {
        match self {
            AnyDeviceProfile::Ds12(p) => p.status_data_length(),
        }
    }
}
