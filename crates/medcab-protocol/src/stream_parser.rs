//! Reassembly of packets from a chunked serial byte stream.
//!
//! A serial read may return part of a packet, several packets, or line
//! noise. [`Framer`] accumulates bytes and cuts complete packets out of
//! the buffer using the fixed header: the packet starts at `STX` and is
//! `8 + DATALEN` bytes long.
//!
//! # Algorithm
//!
//! While at least a header's worth of bytes is buffered:
//!
//! 1. find `STX`; with none in the buffer, discard everything
//! 2. drop any bytes in front of `STX`
//! 3. with fewer than 8 bytes left, wait for more
//! 4. read `DATALEN`; a length that would exceed the packet maximum means
//!    this `STX` was noise, so drop it and rescan
//! 5. with fewer than `8 + DATALEN` bytes, wait for more
//! 6. otherwise split the packet off the front of the buffer
//!
//! Whenever bytes are left over, an incompleteness deadline is (re)armed.
//! Once it passes, the partial buffer is discarded and reported, so a lost
//! byte never stalls the receive path. The owner drives the deadline with
//! [`Framer::expire`], typically from a `select!` against
//! `tokio::time::sleep_until(deadline)`.
//!
//! Validation of markers and checksum is left to
//! [`Packet::parse`](crate::Packet::parse); the framer only delimits.
//!
//! # Usage
//!
//! ```
//! use medcab_protocol::{Framer, FramerEvent};
//! use tokio::time::Instant;
//!
//! let mut framer = Framer::new();
//! let now = Instant::now();
//!
//! // A status request split across two reads.
//! assert!(framer.feed(&[0x02, 0x00, 0x00, 0x80], now).is_empty());
//! let events = framer.feed(&[0x00, 0x00, 0x03, 0x85], now);
//!
//! assert_eq!(events.len(), 1);
//! assert!(matches!(&events[0], FramerEvent::Packet(p) if p.len() == 8));
//! assert_eq!(framer.buffered(), 0);
//! ```
//!
//! # Concurrency
//!
//! The framer is the only owner of its buffer and is not shared: one
//! connection drives one framer from one task.

use bytes::{Buf, Bytes, BytesMut};
use medcab_core::constants::{
    FRAME_TIMEOUT_MS, HEADER_LENGTH, MAX_PACKET_LENGTH, OFFSET_DATA_LENGTH, START_BYTE,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::error::FramingError;

/// Initial receive buffer capacity, a few maximum-size packets.
const INITIAL_BUFFER_CAPACITY: usize = 4 * MAX_PACKET_LENGTH;

/// Output of one [`Framer::feed`] call, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// Exactly one delimited packet, not yet validated.
    Packet(Bytes),
    /// Bytes that were thrown away while resynchronising.
    Discarded(FramingError),
}

/// Stateful packet delimiter with an incompleteness timeout.
#[derive(Debug)]
pub struct Framer {
    buffer: BytesMut,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl Framer {
    /// Create a framer with the default 500 ms incompleteness timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_millis(FRAME_TIMEOUT_MS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            timeout,
            deadline: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// When the buffered partial packet will be discarded, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Number of bytes waiting for the rest of their packet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append `bytes` received at `now` and extract every complete packet.
    ///
    /// A deadline that passed before `now` is honoured first, so stale
    /// bytes are never glued to fresh ones.
    pub fn feed(&mut self, bytes: &[u8], now: Instant) -> Vec<FramerEvent> {
        let mut events = Vec::new();
        if let Some(expired) = self.expire(now) {
            events.push(FramerEvent::Discarded(expired));
        }

        self.buffer.extend_from_slice(bytes);
        trace!(received = bytes.len(), buffered = self.buffer.len(), "Framer fed");

        while self.buffer.len() >= HEADER_LENGTH {
            let start = self.buffer.iter().position(|b| *b == START_BYTE);
            match start {
                None => {
                    let discarded = self.buffer.len();
                    self.buffer.clear();
                    events.push(self.discard(FramingError::NoStartMarker { discarded }));
                    break;
                }
                Some(0) => {}
                Some(offset) => {
                    self.buffer.advance(offset);
                    events.push(self.discard(FramingError::Garbage { discarded: offset }));
                    continue;
                }
            }

            let data_len = self.buffer[OFFSET_DATA_LENGTH];
            let expected = HEADER_LENGTH + usize::from(data_len);
            if expected > MAX_PACKET_LENGTH {
                self.buffer.advance(1);
                events.push(self.discard(FramingError::Overflow { data_len }));
                continue;
            }
            if self.buffer.len() < expected {
                break;
            }

            let packet = self.buffer.split_to(expected).freeze();
            events.push(FramerEvent::Packet(packet));
        }

        self.deadline = if self.buffer.is_empty() {
            None
        } else {
            Some(now + self.timeout)
        };
        events
    }

    /// Discard a partial packet whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Option<FramingError> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                let discarded = self.buffer.len();
                self.buffer.clear();
                self.deadline = None;
                if discarded == 0 {
                    return None;
                }
                let error = FramingError::Timeout {
                    discarded,
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                };
                warn!(error = %error, "Discarding incomplete packet");
                Some(error)
            }
            _ => None,
        }
    }

    /// Drop all buffered bytes and disarm the deadline.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.deadline = None;
    }

    fn discard(&self, error: FramingError) -> FramerEvent {
        warn!(error = %error, "Framer resynchronising");
        FramerEvent::Discarded(error)
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}
