//! Shared helpers for the protocol integration tests.
//!
//! Builders here play the role of the cabinet board: they produce the
//! bytes a DS12 would put on the wire.

#![allow(dead_code)]

use bytes::Bytes;
use medcab_protocol::{Framer, FramerEvent, Packet};
use tokio::time::Instant;

pub const SUCCESS: u8 = 0x10;
pub const FAILED: u8 = 0x11;

/// Encoded response packet.
pub fn response(lock_num: u8, command: u8, ask: u8, data: &[u8]) -> Vec<u8> {
    Packet::new(0x00, lock_num, command, ask, data.to_vec())
        .expect("test data fits in a packet")
        .to_bytes()
        .to_vec()
}

/// Unlock acknowledgement for a one-based slot.
pub fn unlock_response(slot: u8, ask: u8) -> Vec<u8> {
    response(slot - 1, 0x81, ask, &[])
}

/// Status response with the given bitmap bytes.
pub fn status_response(byte1: u8, byte2: u8) -> Vec<u8> {
    response(0, 0x80, SUCCESS, &[byte1, byte2])
}

/// Feed every chunk at `now` and collect the delimited packets.
pub fn feed_chunks(framer: &mut Framer, chunks: &[&[u8]], now: Instant) -> Vec<Bytes> {
    chunks
        .iter()
        .flat_map(|chunk| framer.feed(chunk, now))
        .filter_map(|event| match event {
            FramerEvent::Packet(bytes) => Some(bytes),
            FramerEvent::Discarded(_) => None,
        })
        .collect()
}
