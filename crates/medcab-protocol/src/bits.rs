//! Byte and bit helpers shared by the packet codec and the device profiles.
//!
//! Everything here is a pure function returning a `Result`; malformed input
//! is an error value, never a panic.
//!
//! # Examples
//!
//! ```
//! use medcab_protocol::bits::{assemble_slot_states, checksum, extract_bits};
//!
//! assert_eq!(checksum(&[0x02, 0x00, 0x00, 0x80, 0x00, 0x00, 0x03]).unwrap(), 0x85);
//!
//! let bits = extract_bits(0b0000_0101);
//! assert!(bits[0] && !bits[1] && bits[2]);
//!
//! // Two status bytes, truncated to a 12-slot device.
//! let slots = assemble_slot_states(12, &[0xFF, 0xF1]).unwrap();
//! assert_eq!(slots.len(), 12);
//! assert!(slots[8] && !slots[9]);
//! ```

use crate::error::BinaryError;

pub type Result<T> = std::result::Result<T, BinaryError>;

/// Low byte of the arithmetic sum of `bytes`.
///
/// # Errors
/// Returns [`BinaryError::EmptyBuffer`] for an empty slice.
pub fn checksum(bytes: &[u8]) -> Result<u8> {
    if bytes.is_empty() {
        return Err(BinaryError::EmptyBuffer);
    }
    Ok(sum(bytes))
}

/// Wrapping byte sum, used where the input is known to be non-empty.
pub(crate) fn sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Split a byte into its eight bits, index `i` holding `(byte >> i) & 1`.
#[must_use]
pub fn extract_bits(byte: u8) -> [bool; 8] {
    std::array::from_fn(|i| (byte >> i) & 1 == 1)
}

/// Narrow an integer to a byte.
///
/// # Errors
/// Returns [`BinaryError::ByteOutOfRange`] unless `0 <= value <= 255`.
pub fn to_byte(value: i64) -> Result<u8> {
    u8::try_from(value).map_err(|_| BinaryError::ByteOutOfRange(value))
}

/// Uppercase hex dump with a space between bytes (`"02 00 0A"`).
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a hex string, ignoring whitespace between byte pairs.
///
/// # Errors
/// Returns [`BinaryError::InvalidHex`] for odd-length or non-hex input.
pub fn from_hex(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&compact).map_err(|e| BinaryError::InvalidHex(format!("{text:?}: {e}")))
}

/// Eight-character binary rendering of a byte, most significant bit first.
#[must_use]
pub fn to_binary_string(byte: u8) -> String {
    format!("{byte:08b}")
}

/// Concatenate the per-byte bits of `data` and keep the first `slot_count`.
///
/// # Errors
/// - [`BinaryError::EmptyBuffer`] if `data` is empty.
/// - [`BinaryError::LengthOutOfRange`] if `data` holds fewer than `slot_count` bits.
pub fn assemble_slot_states(slot_count: usize, data: &[u8]) -> Result<Vec<bool>> {
    if data.is_empty() {
        return Err(BinaryError::EmptyBuffer);
    }
    let needed = slot_count.div_ceil(8);
    if data.len() < needed {
        return Err(BinaryError::LengthOutOfRange {
            needed,
            actual: data.len(),
        });
    }
    Ok(data
        .iter()
        .flat_map(|b| extract_bits(*b))
        .take(slot_count)
        .collect())
}
