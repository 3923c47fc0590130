//! Error types for the wire protocol.
//!
//! Every variant carries the offending values so a rejected packet can be
//! diagnosed from the log line alone.

use thiserror::Error;

/// Errors from the primitive byte helpers in [`crate::bits`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BinaryError {
    #[error("Empty buffer")]
    EmptyBuffer,

    #[error("Value {0} is not a byte (0-255)")]
    ByteOutOfRange(i64),

    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    #[error("Need {needed} bytes, got {actual}")]
    LengthOutOfRange { needed: usize, actual: usize },
}

/// Errors from packet validation and response interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Packet too short: {len} bytes, minimum {min}")]
    TooShort { len: usize, min: usize },

    #[error("Packet too long: {len} bytes, maximum {max}")]
    TooLong { len: usize, max: usize },

    #[error("Bad frame markers: STX=0x{stx:02X}, ETX=0x{etx:02X}")]
    BadMarker { stx: u8, etx: u8 },

    #[error("Length mismatch: DATALEN {data_len} implies {expected} bytes, got {actual}")]
    LengthMismatch {
        data_len: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Checksum mismatch: computed 0x{computed:02X}, packet carries 0x{received:02X}")]
    ChecksumMismatch { computed: u8, received: u8 },

    #[error("Unknown command opcode 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("Unknown ASK status 0x{0:02X}")]
    UnknownAsk(u8),

    #[error("{command} response carries {actual} data bytes, expected {expected}")]
    UnexpectedDataLength {
        command: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unexpected {command} response (ASK {ask}) while {phase}")]
    UnexpectedForPhase {
        command: String,
        ask: String,
        phase: String,
    },

    #[error("Slot {slot} out of range, valid slots are 1-{max}")]
    InvalidSlot { slot: i64, max: u8 },

    #[error("Data section of {len} bytes exceeds maximum {max}")]
    DataTooLong { len: usize, max: usize },

    #[error(transparent)]
    Binary(#[from] BinaryError),

    #[error(transparent)]
    Domain(medcab_core::Error),
}

impl From<medcab_core::Error> for ProtocolError {
    fn from(error: medcab_core::Error) -> Self {
        match error {
            medcab_core::Error::InvalidSlot { slot, max } => Self::InvalidSlot { slot, max },
            other => Self::Domain(other),
        }
    }
}

/// Events where the stream parser had to throw bytes away.
///
/// These are recovered locally by resynchronising on the next STX; they
/// are reported so the discard can be logged and audited.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("No STX in buffer, discarded {discarded} bytes")]
    NoStartMarker { discarded: usize },

    #[error("Discarded {discarded} garbage bytes before STX")]
    Garbage { discarded: usize },

    #[error("Incomplete packet timed out after {timeout_ms}ms, discarded {discarded} bytes")]
    Timeout { discarded: usize, timeout_ms: u64 },

    #[error("DATALEN {data_len} would exceed maximum packet length, dropped STX")]
    Overflow { data_len: u8 },
}

/// Error type of [`PacketCodec`](crate::PacketCodec).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
