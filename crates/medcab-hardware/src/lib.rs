//! Serial transport for the DS12 medication cabinet.
//!
//! This crate owns the one byte channel between the host and the cabinet
//! board and everything needed to keep it usable:
//!
//! - [`SerialLink`]: opens a duplex byte stream ([`SerialPortLink`] for a
//!   real RS485 adapter, [`mock::MockLink`] for an in-memory cabinet)
//! - [`ConnectionManager`]: connect, protected connect with exponential
//!   backoff, graceful and emergency disconnect, and a reader task that
//!   reassembles packets from the stream
//! - [`CommandSequencer`]: single-flight command queue with write retries
//!   and response matching by opcode
//!
//! # Example
//!
//! ```
//! use medcab_core::DeviceAddress;
//! use medcab_hardware::mock::MockLink;
//! use medcab_hardware::{
//!     CommandSequencer, ConnectionConfig, ConnectionManager, LinkEvent, SerialConfig,
//! };
//! use medcab_protocol::{build_status_request, parse_response};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (link, _cabinet) = MockLink::new();
//!     let (manager, mut events) =
//!         ConnectionManager::new(link, SerialConfig::default(), ConnectionConfig::default());
//!     let manager = Arc::new(manager);
//!     manager.connect().await?;
//!
//!     let sequencer = CommandSequencer::new(Arc::clone(&manager));
//!     sequencer.send(build_status_request(DeviceAddress::default())).await?;
//!
//!     if let Some(LinkEvent::Packet(bytes)) = events.recv().await {
//!         let response = parse_response(&bytes)?;
//!         sequencer.response_received(response.packet.command);
//!         assert_eq!(response.slot_bits().map(<[bool]>::len), Some(12));
//!     }
//!
//!     sequencer.shutdown().await;
//!     manager.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod connection;
pub mod error;
pub mod link;
pub mod mock;
pub mod sequencer;

pub use config::{ConnectionConfig, Parity, SerialConfig};
pub use connection::{ConnectReport, ConnectionManager, HealthReport, HealthStatus, LinkEvent};
pub use error::{Result, TransportError};
pub use link::{PortInfo, SerialLink, SerialPortLink, list_ports};
pub use sequencer::CommandSequencer;
