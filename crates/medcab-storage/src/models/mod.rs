pub mod audit;
pub mod slot;
pub mod user;

pub use audit::AuditEntry;
pub use slot::{SlotRecord, SlotUpdate};
pub use user::UserRecord;
