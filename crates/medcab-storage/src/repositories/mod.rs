pub mod audit;
pub mod slot;
pub mod user;

pub use audit::{AuditLogRepository, SqliteAuditLogRepository};
pub use slot::{SlotRepository, SqliteSlotRepository};
pub use user::{SqliteUserRepository, UserRepository};
