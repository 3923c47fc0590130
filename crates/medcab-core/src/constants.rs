//! Core constants for the cabinet wire protocol.
//!
//! Every packet exchanged with the cabinet board over RS485 has the same
//! fixed eight byte header followed by an optional data section:
//!
//! ```text
//! offset:  0    1     2        3    4    5        6    7    8..
//!          STX  ADDR  LOCKNUM  CMD  ASK  DATALEN  ETX  SUM  DATA[0..DATALEN)
//! ```
//!
//! - `STX` is always `0x02` and `ETX` is always `0x03`, at fixed offsets.
//! - `SUM` is the low byte of the arithmetic sum of every other byte,
//!   data included.
//! - The total length is `8 + DATALEN`, never more than [`MAX_PACKET_LENGTH`].
//!
//! # Usage
//!
//! ```
//! use medcab_core::constants::*;
//!
//! assert_eq!(HEADER_LENGTH + 2, 10);
//! assert_eq!(OFFSET_DATA_LENGTH, 5);
//! assert_eq!(DEFAULT_BAUD_RATE, 19_200);
//! ```
//!
//! # Protocol Compliance
//!
//! The values in this module must match the cabinet firmware bit for bit.
//! Changing any of them breaks hardware compatibility.

// ============================================================================
// Packet Framing
// ============================================================================

/// Start of text marker (STX), always the first byte of a packet.
pub const START_BYTE: u8 = 0x02;

/// End of text marker (ETX), always at [`OFFSET_ETX`].
pub const END_BYTE: u8 = 0x03;

/// Length of the fixed header (`STX..=SUM`).
///
/// Also the minimum length of any valid packet.
pub const HEADER_LENGTH: usize = 8;

/// Maximum total packet length accepted from the wire.
pub const MAX_PACKET_LENGTH: usize = 48;

/// Maximum data section length (`MAX_PACKET_LENGTH - HEADER_LENGTH`).
pub const MAX_DATA_LENGTH: usize = MAX_PACKET_LENGTH - HEADER_LENGTH;

// ============================================================================
// Header Offsets
// ============================================================================

pub const OFFSET_STX: usize = 0;
pub const OFFSET_ADDRESS: usize = 1;
pub const OFFSET_LOCK_NUM: usize = 2;
pub const OFFSET_COMMAND: usize = 3;
pub const OFFSET_ASK: usize = 4;
pub const OFFSET_DATA_LENGTH: usize = 5;
pub const OFFSET_ETX: usize = 6;
pub const OFFSET_CHECKSUM: usize = 7;
pub const OFFSET_DATA: usize = 8;

// ============================================================================
// DS12 Opcodes
// ============================================================================

/// Request the lock state bitmap of every slot.
pub const OPCODE_STATUS_REQUEST: u8 = 0x80;

/// Release the lock of one slot (`LOCKNUM` selects the slot).
pub const OPCODE_UNLOCK_SLOT: u8 = 0x81;

/// Re-engage every lock.
pub const OPCODE_LOCK_ALL: u8 = 0x82;

/// Reboot the cabinet board.
pub const OPCODE_RESET_SYSTEM: u8 = 0x83;

/// Query hardware and firmware version.
///
/// Older status tables list `0x84` for this command; the boards in the
/// field answer `0x8F`, which is the value used on the wire.
pub const OPCODE_GET_VERSION: u8 = 0x8F;

/// Write board configuration.
pub const OPCODE_SET_CONFIG: u8 = 0x85;

// ============================================================================
// ASK Status Codes
// ============================================================================

pub const ASK_DEFAULT: u8 = 0x00;
pub const ASK_SUCCESS: u8 = 0x10;
pub const ASK_FAILED: u8 = 0x11;
pub const ASK_TIMEOUT: u8 = 0x12;
pub const ASK_UNKNOWN_COMMAND: u8 = 0x13;
pub const ASK_DATA_VERIFICATION_FAILED: u8 = 0x14;

// ============================================================================
// DS12 Device Geometry
// ============================================================================

/// Number of slots on a DS12 cabinet.
pub const DS12_SLOT_COUNT: u8 = 12;

/// Data bytes carried by a DS12 status response.
///
/// Byte 1 holds slots 1-8 (bit 0 = slot 1), byte 2 bits 0-3 hold slots 9-12.
/// Bits 4-7 of byte 2 are unused and always discarded.
pub const DS12_STATUS_DATA_LENGTH: usize = 2;

/// Data bytes carried by a version response.
pub const VERSION_DATA_LENGTH: usize = 2;

// ============================================================================
// Serial Channel Defaults
// ============================================================================

/// Default RS485 baud rate (8 data bits, no parity, 1 stop bit).
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

/// Default board address on the RS485 bus.
pub const DEFAULT_DEVICE_ADDRESS: u8 = 0x00;

// ============================================================================
// Timing
// ============================================================================

/// Time an incomplete packet may sit in the receive buffer (milliseconds).
///
/// When it expires the partial buffer is discarded and the event logged,
/// so a lost byte never stalls the receive path.
pub const FRAME_TIMEOUT_MS: u64 = 500;

/// Time a sent command may wait for its response before the next queued
/// command is released (milliseconds).
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1_000;

/// Interval between status polls while waiting for a lock-back (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Attempts made by a protected connect before giving up.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

/// First backoff delay of a protected connect (milliseconds), doubled per attempt.
pub const DEFAULT_CONNECT_BASE_DELAY_MS: u64 = 500;

/// Attempts made to write one queued command before it fails.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

/// Linear backoff step between write attempts (milliseconds).
pub const DEFAULT_WRITE_RETRY_DELAY_MS: u64 = 100;

/// Queue depth above which the connection reports itself degraded.
pub const DEGRADED_QUEUE_DEPTH: usize = 5;
