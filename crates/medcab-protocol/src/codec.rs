//! `tokio_util` codec for cabinet packets.
//!
//! [`PacketCodec`] wraps a [`Framer`] so a byte stream can be driven through
//! `Framed`, yielding validated [`Packet`]s and accepting packets to send.
//!
//! ```text
//! byte stream -> Framer -> Packet::parse -> Packet
//! Packet -> Packet::encode_into -> byte stream
//! ```
//!
//! Invalid packets are logged and skipped instead of returned as errors:
//! an `Err` from a decoder ends a `Framed` stream, and one corrupted packet
//! on a noisy RS485 line must not take the whole link down.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use medcab_core::DeviceAddress;
//! use medcab_protocol::{PacketCodec, build_status_request};
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let mut codec = PacketCodec::new();
//! let mut buffer = BytesMut::new();
//! codec.encode(build_status_request(DeviceAddress::default()), &mut buffer).unwrap();
//!
//! let packet = codec.decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(packet.command, 0x80);
//! ```

use bytes::BytesMut;
use std::collections::VecDeque;
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::CodecError;
use crate::packet::Packet;
use crate::stream_parser::{Framer, FramerEvent};

#[derive(Debug, Default)]
pub struct PacketCodec {
    framer: Framer,
    ready: VecDeque<Packet>,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec around a framer with a custom incompleteness timeout.
    pub fn with_framer(framer: Framer) -> Self {
        Self {
            framer,
            ready: VecDeque::new(),
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        if !src.is_empty() {
            // The framer owns buffering; hand every byte over.
            let events = self.framer.feed(src, Instant::now());
            src.clear();

            for event in events {
                if let FramerEvent::Packet(bytes) = event {
                    match Packet::parse(&bytes) {
                        Ok(packet) => self.ready.push_back(packet),
                        Err(e) => warn!(error = %e, "Dropping invalid packet"),
                    }
                }
            }
        }

        Ok(self.ready.pop_front())
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        item.encode_into(dst);
        Ok(())
    }
}
