//! Persistence for the medication cabinet.
//!
//! SQLite-backed storage of the three things the controller reads and
//! writes outside the hardware: per-slot bookkeeping, the operators allowed
//! to work the cabinet, and the append-only audit trail.
//!
//! # Architecture
//!
//! - [`Database`] - connection pool with embedded migrations
//! - [`SlotRepository`], [`UserRepository`], [`AuditLogRepository`] - data
//!   access traits with `Sqlite*` implementations
//! - [`SqliteStore`] - one handle implementing all three, what the
//!   controller is generic over through [`CabinetStore`]
//!
//! Slot updates are single `UPDATE` statements, so concurrent load and
//! pickup bookkeeping on the same row never loses a write.
//!
//! # Examples
//!
//! ```no_run
//! use medcab_storage::{Database, DatabaseConfig, SlotRepository, SlotUpdate, SqliteStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("medcab.db")).await?;
//! let store = SqliteStore::new(db);
//! store.ensure_slots(12).await?;
//!
//! store.update_slot(3, &SlotUpdate::loaded("HN1")).await?;
//! let slot = store.find_slot(3).await?.expect("provisioned");
//! assert!(slot.can_dispense());
//! # Ok(())
//! # }
//! ```
//!
//! # Security Considerations
//!
//! Passkeys are compared in constant time via the `subtle` crate and are
//! never serialized or printed. All queries are parameterized.

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;
pub mod store;

pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use models::{AuditEntry, SlotRecord, SlotUpdate, UserRecord};
pub use repositories::{
    AuditLogRepository, SlotRepository, SqliteAuditLogRepository, SqliteSlotRepository,
    SqliteUserRepository, UserRepository,
};
pub use store::{CabinetStore, SqliteStore};
