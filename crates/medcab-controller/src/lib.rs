//! Workflow controller for the DS12 medication cabinet.
//!
//! [`CabinetController`] ties the serial transport, the device profile and
//! the persistence layer together and runs the load and pickup workflows:
//!
//! ```text
//! Idle ── unlock ──▶ Unlocking ── ack ──▶ AwaitingLockBack ── locked ──▶ Idle
//! Idle ── dispense ▶ Dispensing ─ ack ──▶ AwaitingDispenseLockBack ─────▶ Idle
//! ```
//!
//! Every response packet goes through one dispatcher that picks exactly one
//! handler from the command byte and the current [`ControllerPhase`].
//! Progress is reported as [`CabinetEvent`]s on an [`EventSink`], and
//! every outcome, success or failure, leaves one row in the audit log.
//!
//! # Example
//!
//! ```
//! use medcab_controller::{CabinetController, ControllerConfig, RecordingSink};
//! use medcab_core::Credential;
//! use medcab_hardware::mock::MockLink;
//! use medcab_storage::{Database, SqliteStore, UserRecord, UserRepository};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteStore::new(Database::in_memory().await?);
//!     store.create(&UserRecord::new("Nurse", "nurse", "4821")).await?;
//!
//!     let (link, _cabinet) = MockLink::new();
//!     let events = RecordingSink::new();
//!     let controller = CabinetController::new(
//!         link,
//!         store,
//!         Arc::new(events.clone()),
//!         ControllerConfig::default(),
//!     )?;
//!     controller.initialize().await?;
//!
//!     let credential = Credential::new("4821")?;
//!     controller.unlock(3, "HN1", &credential).await?;
//!
//!     controller.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod events;
pub mod phase;

pub use config::ControllerConfig;
pub use context::{OperationContext, OperationKind};
pub use controller::CabinetController;
pub use error::{OperationError, ReasonCode, Result};
pub use events::{CabinetEvent, EventBus, EventSink, NullSink, RecordingSink, SlotState};
pub use phase::{ControllerPhase, InvalidTransition, PhaseMachine, PhaseTransition};
