//! Command-specific interpretation of validated response packets.
//!
//! | Command          | DATA bytes     | Payload                          |
//! |------------------|----------------|----------------------------------|
//! | `STATUS_REQUEST` | status length  | per-slot bits                    |
//! | `UNLOCK_SLOT`    | 0              | `success = ASK == SUCCESS`       |
//! | `GET_VERSION`    | 2              | hardware and software version    |
//! | others           | any            | acknowledgement only             |
//!
//! Status and version data is only interpreted on `ASK = SUCCESS`; a
//! rejected query carries no meaningful data and decodes as an
//! acknowledgement so the caller can branch on [`ParsedResponse::ask`].
//!
//! Results leaving this crate toward a host are wrapped in a
//! [`ResponseEnvelope`] so success and failure share one serialisable shape.

use chrono::{DateTime, Utc};
use medcab_core::constants::VERSION_DATA_LENGTH;
use serde::Serialize;
use std::fmt;

use crate::commands::{AskStatus, Command};
use crate::device::{DeviceKind, DeviceProfile, Ds12Profile};
use crate::error::ProtocolError;
use crate::packet::Packet;

/// Hardware and firmware revision reported by `GET_VERSION`.
///
/// Each byte is rendered as `"{high nibble}.{low nibble}"`, so `0x12`
/// becomes `"1.2"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareVersion {
    pub hardware: String,
    pub software: String,
}

impl FirmwareVersion {
    pub fn from_bytes(hardware: u8, software: u8) -> Self {
        Self {
            hardware: nibble_pair(hardware),
            software: nibble_pair(software),
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hw {} / sw {}", self.hardware, self.software)
    }
}

fn nibble_pair(byte: u8) -> String {
    format!("{}.{}", byte >> 4, byte & 0x0F)
}

/// Decoded data section of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResponsePayload {
    /// Raw per-slot bits, index 0 being slot 1. Lock meaning depends on
    /// the configured [`LockPolarity`](crate::LockPolarity).
    SlotBits { bits: Vec<bool> },
    Unlock { success: bool },
    Version(FirmwareVersion),
    Ack,
}

/// A response that passed framing validation and was interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub packet: Packet,
    pub command: Command,
    pub ask: AskStatus,
    pub payload: ResponsePayload,
}

impl ParsedResponse {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.ask.is_success()
    }

    /// `true` for an unlock response carrying `ASK = SUCCESS`.
    pub fn unlock_success(&self) -> bool {
        matches!(self.payload, ResponsePayload::Unlock { success: true })
    }

    pub fn slot_bits(&self) -> Option<&[bool]> {
        match &self.payload {
            ResponsePayload::SlotBits { bits } => Some(bits),
            _ => None,
        }
    }
}

/// Interpret a framed packet for `profile`.
///
/// # Errors
/// - [`ProtocolError::UnknownCommand`] for an opcode outside the profile's table.
/// - [`ProtocolError::UnknownAsk`] for an unknown `ASK` byte.
/// - [`ProtocolError::UnexpectedDataLength`] when `DATALEN` does not fit the command.
pub fn interpret<P>(profile: &P, packet: Packet) -> Result<ParsedResponse, ProtocolError>
where
    P: DeviceProfile + ?Sized,
{
    let command = profile
        .command_for(packet.command)
        .ok_or(ProtocolError::UnknownCommand(packet.command))?;
    let ask = AskStatus::parse(packet.ask)?;

    let payload = match command {
        Command::UnlockSlot => {
            expect_len(command, 0, packet.data())?;
            ResponsePayload::Unlock {
                success: ask.is_success(),
            }
        }
        Command::StatusRequest if ask.is_success() => ResponsePayload::SlotBits {
            bits: profile.slot_states(packet.data())?,
        },
        Command::GetVersion if ask.is_success() => {
            expect_len(command, VERSION_DATA_LENGTH, packet.data())?;
            let data = packet.data();
            ResponsePayload::Version(FirmwareVersion::from_bytes(data[0], data[1]))
        }
        _ => ResponsePayload::Ack,
    };

    Ok(ParsedResponse {
        packet,
        command,
        ask,
        payload,
    })
}

fn expect_len(command: Command, expected: usize, data: &[u8]) -> Result<(), ProtocolError> {
    if data.len() != expected {
        return Err(ProtocolError::UnexpectedDataLength {
            command: command.to_string(),
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Validate and interpret a DS12 response.
///
/// # Examples
///
/// ```
/// use medcab_protocol::{AskStatus, Command, parse_response};
///
/// // Unlock of slot 3 acknowledged with ASK = SUCCESS.
/// let bytes = [0x02, 0x00, 0x02, 0x81, 0x10, 0x00, 0x03, 0x98];
/// let response = parse_response(&bytes).unwrap();
/// assert_eq!(response.command, Command::UnlockSlot);
/// assert_eq!(response.ask, AskStatus::Success);
/// assert!(response.unlock_success());
/// ```
///
/// # Errors
/// See [`Packet::parse`] and [`interpret`].
pub fn parse_response(bytes: &[u8]) -> Result<ParsedResponse, ProtocolError> {
    Ds12Profile.parse_response(bytes)
}

/// Uniform result shape handed to hosts: `{success, data?, error?, device_type, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub device_type: DeviceKind,
    pub timestamp: DateTime<Utc>,
}

impl<T> ResponseEnvelope<T> {
    pub fn ok(device_type: DeviceKind, data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            device_type,
            timestamp: Utc::now(),
        }
    }

    pub fn err(device_type: DeviceKind, error: impl fmt::Display) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            device_type,
            timestamp: Utc::now(),
        }
    }

    pub fn from_result<E: fmt::Display>(device_type: DeviceKind, result: Result<T, E>) -> Self {
        match result {
            Ok(data) => Self::ok(device_type, data),
            Err(e) => Self::err(device_type, e),
        }
    }
}
