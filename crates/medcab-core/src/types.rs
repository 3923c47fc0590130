use crate::{Result, constants::DEFAULT_DEVICE_ADDRESS, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// One-based slot number, validated against the slot count of a device.
///
/// The wire format addresses slots by zero-based `LOCKNUM`; use
/// [`SlotId::lock_num`] and [`SlotId::from_lock_num`] to convert.
///
/// # Examples
///
/// ```
/// use medcab_core::SlotId;
///
/// let slot = SlotId::new(3, 12).unwrap();
/// assert_eq!(slot.get(), 3);
/// assert_eq!(slot.lock_num(), 2);
///
/// assert!(SlotId::new(0, 12).is_err());
/// assert!(SlotId::new(13, 12).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(u8);

impl SlotId {
    /// Create a slot id, checking `1 <= id <= slot_count`.
    ///
    /// # Errors
    /// Returns `Error::InvalidSlot` if the id is outside the device range.
    pub fn new(id: i64, slot_count: u8) -> Result<Self> {
        if id < 1 || id > i64::from(slot_count) {
            return Err(Error::InvalidSlot {
                slot: id,
                max: slot_count,
            });
        }
        // Range checked above, so the cast cannot truncate.
        Ok(SlotId(id as u8))
    }

    /// Build a slot id from a zero-based `LOCKNUM` byte.
    ///
    /// # Errors
    /// Returns `Error::InvalidSlot` if the lock number maps outside the device range.
    pub fn from_lock_num(lock_num: u8, slot_count: u8) -> Result<Self> {
        Self::new(i64::from(lock_num) + 1, slot_count)
    }

    #[must_use]
    pub fn get(&self) -> u8 {
        self.0
    }

    /// Zero-based lock number used in the packet header.
    #[must_use]
    pub fn lock_num(&self) -> u8 {
        self.0 - 1
    }

    /// Zero-based index into a slot-state vector.
    #[must_use]
    pub fn index(&self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// RS485 bus address of a cabinet board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    #[must_use]
    pub const fn new(address: u8) -> Self {
        DeviceAddress(address)
    }

    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl Default for DeviceAddress {
    fn default() -> Self {
        DeviceAddress(DEFAULT_DEVICE_ADDRESS)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Identifier of the patient/medication record a slot is loaded for.
///
/// Trimmed on construction and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a record id.
    ///
    /// # Errors
    /// Returns `Error::InvalidRecordId` if the value is blank.
    pub fn new(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::InvalidRecordId(
                "record id must not be empty".to_string(),
            ));
        }
        Ok(RecordId(value.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RecordId::new(s)
    }
}

/// Operator passkey presented with every slot operation.
///
/// # Security
/// Comparison is constant-time so response timing does not leak how much
/// of a guessed passkey matched. `Debug` never prints the secret.
#[derive(Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Create a credential.
    ///
    /// # Errors
    /// Returns `Error::InvalidCredential` if the passkey is blank.
    pub fn new(passkey: &str) -> Result<Self> {
        if passkey.trim().is_empty() {
            return Err(Error::InvalidCredential(
                "passkey must not be empty".to_string(),
            ));
        }
        Ok(Credential(passkey.to_string()))
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}
