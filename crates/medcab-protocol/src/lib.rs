//! Wire protocol for the DS12 medication cabinet board.
//!
//! Layers, leaves first:
//!
//! - [`bits`]: checksum, hex and per-byte slot-bit helpers
//! - [`packet`]: the fixed-header packet, its encoder and validating parser
//! - [`response`]: command-specific interpretation of validated responses
//! - [`device`]: per-family capability trait ([`DeviceProfile`]) and the DS12 profile
//! - [`stream_parser`]: reassembly of packets from a chunked byte stream
//! - [`codec`]: `tokio_util` codec over the stream parser

pub mod bits;
pub mod codec;
pub mod commands;
pub mod device;
pub mod error;
pub mod packet;
pub mod response;
pub mod stream_parser;

pub use codec::PacketCodec;
pub use commands::{AskStatus, Command};
pub use device::{AnyDeviceProfile, DeviceKind, DeviceProfile, Ds12Profile, LockPolarity};
pub use error::{BinaryError, CodecError, FramingError, ProtocolError};
pub use packet::{Packet, build_status_request, build_unlock};
pub use response::{
    FirmwareVersion, ParsedResponse, ResponseEnvelope, ResponsePayload, parse_response,
};
pub use stream_parser::{Framer, FramerEvent};
