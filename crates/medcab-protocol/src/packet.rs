//! The fixed-header packet exchanged with the cabinet board.
//!
//! ```text
//! offset:  0    1     2        3    4    5        6    7    8..
//!          STX  ADDR  LOCKNUM  CMD  ASK  DATALEN  ETX  SUM  DATA[0..DATALEN)
//! ```
//!
//! Requests and responses share the layout. [`Packet::parse`] validates the
//! framing of raw bytes in a fixed order and stops at the first failure:
//!
//! 1. total length within `8..=48`
//! 2. `STX` at offset 0 and `ETX` at offset 6
//! 3. total length equals `8 + DATALEN`
//! 4. `SUM` equals the low byte of the sum of every other byte
//!
//! Interpreting the `CMD`/`ASK`/`DATA` of a valid packet is the job of
//! [`crate::response`].
//!
//! # Examples
//!
//! ```
//! use medcab_core::DeviceAddress;
//! use medcab_protocol::{Packet, build_unlock};
//!
//! let packet = build_unlock(DeviceAddress::new(0x00), 3).unwrap();
//! let bytes = packet.to_bytes();
//! assert_eq!(&bytes[..], &[0x02, 0x00, 0x02, 0x81, 0x00, 0x00, 0x03, 0x88]);
//!
//! let parsed = Packet::parse(&bytes).unwrap();
//! assert_eq!(parsed, packet);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use medcab_core::DeviceAddress;
use medcab_core::constants::{
    END_BYTE, HEADER_LENGTH, MAX_DATA_LENGTH, MAX_PACKET_LENGTH, OFFSET_ADDRESS, OFFSET_ASK,
    OFFSET_CHECKSUM, OFFSET_COMMAND, OFFSET_DATA, OFFSET_DATA_LENGTH, OFFSET_ETX, OFFSET_LOCK_NUM,
    OFFSET_STX, START_BYTE,
};
use std::fmt;

use crate::bits;
use crate::device::{DeviceProfile, Ds12Profile};
use crate::error::ProtocolError;

/// One protocol packet with raw header fields.
///
/// `command` and `ask` are kept as bytes so a packet carrying an opcode
/// unknown to the local profile can still be framed, logged and rejected
/// by the response layer with a precise error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub address: u8,
    pub lock_num: u8,
    pub command: u8,
    pub ask: u8,
    data: Bytes,
}

impl Packet {
    /// Create a packet.
    ///
    /// # Errors
    /// Returns [`ProtocolError::DataTooLong`] if `data` exceeds 40 bytes.
    pub fn new(
        address: u8,
        lock_num: u8,
        command: u8,
        ask: u8,
        data: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        let data = data.into();
        if data.len() > MAX_DATA_LENGTH {
            return Err(ProtocolError::DataTooLong {
                len: data.len(),
                max: MAX_DATA_LENGTH,
            });
        }
        Ok(Self {
            address,
            lock_num,
            command,
            ask,
            data,
        })
    }

    /// Data-less request packet with `ASK = 0x00`.
    pub fn request(address: DeviceAddress, lock_num: u8, command: u8) -> Self {
        Self {
            address: address.as_u8(),
            lock_num,
            command,
            ask: 0x00,
            data: Bytes::new(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Value of the `DATALEN` byte.
    pub fn data_len(&self) -> u8 {
        // Bounded by MAX_DATA_LENGTH at construction.
        self.data.len() as u8
    }

    /// Total encoded length, `8 + DATALEN`.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        HEADER_LENGTH + self.data.len()
    }

    /// `SUM` byte for this packet.
    pub fn checksum(&self) -> u8 {
        let header = [
            START_BYTE,
            self.address,
            self.lock_num,
            self.command,
            self.ask,
            self.data_len(),
            END_BYTE,
        ];
        bits::sum(&header).wrapping_add(bits::sum(&self.data))
    }

    /// Append the wire encoding to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.len());
        dst.put_u8(START_BYTE);
        dst.put_u8(self.address);
        dst.put_u8(self.lock_num);
        dst.put_u8(self.command);
        dst.put_u8(self.ask);
        dst.put_u8(self.data_len());
        dst.put_u8(END_BYTE);
        dst.put_u8(self.checksum());
        dst.put_slice(&self.data);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Validate and decode raw bytes.
    ///
    /// # Errors
    /// The first failing check, as [`ProtocolError::TooShort`],
    /// [`ProtocolError::TooLong`], [`ProtocolError::BadMarker`],
    /// [`ProtocolError::LengthMismatch`] or [`ProtocolError::ChecksumMismatch`].
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let len = bytes.len();
        if len < HEADER_LENGTH {
            return Err(ProtocolError::TooShort {
                len,
                min: HEADER_LENGTH,
            });
        }
        if len > MAX_PACKET_LENGTH {
            return Err(ProtocolError::TooLong {
                len,
                max: MAX_PACKET_LENGTH,
            });
        }

        let (stx, etx) = (bytes[OFFSET_STX], bytes[OFFSET_ETX]);
        if stx != START_BYTE || etx != END_BYTE {
            return Err(ProtocolError::BadMarker { stx, etx });
        }

        let data_len = bytes[OFFSET_DATA_LENGTH];
        let expected = HEADER_LENGTH + usize::from(data_len);
        if len != expected {
            return Err(ProtocolError::LengthMismatch {
                data_len,
                expected,
                actual: len,
            });
        }

        let received = bytes[OFFSET_CHECKSUM];
        let computed =
            bits::sum(&bytes[..OFFSET_CHECKSUM]).wrapping_add(bits::sum(&bytes[OFFSET_DATA..]));
        if computed != received {
            return Err(ProtocolError::ChecksumMismatch { computed, received });
        }

        Ok(Self {
            address: bytes[OFFSET_ADDRESS],
            lock_num: bytes[OFFSET_LOCK_NUM],
            command: bytes[OFFSET_COMMAND],
            ask: bytes[OFFSET_ASK],
            data: Bytes::copy_from_slice(&bytes[OFFSET_DATA..]),
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bits::to_hex(&self.to_bytes()))
    }
}

/// DS12 status request: `CMD = 0x80`, `LOCKNUM = 0`, no data.
pub fn build_status_request(address: DeviceAddress) -> Packet {
    Ds12Profile.build_status_request(address)
}

/// DS12 unlock request for a one-based slot.
///
/// # Errors
/// Returns [`ProtocolError::InvalidSlot`] unless `1 <= slot_id <= 12`.
pub fn build_unlock(address: DeviceAddress, slot_id: i64) -> Result<Packet, ProtocolError> {
    Ds12Profile.build_unlock(address, slot_id)
}
