use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One audit trail row.
///
/// Every controller operation outcome, and every recovered framing or
/// transport fault, produces exactly one entry. `process` names the
/// workflow step (`unlock`, `dispense`, `packet-timeout`, ...) and `reason`
/// carries the stable reason code of a failure.
///
/// # Examples
///
/// ```
/// use medcab_storage::models::AuditEntry;
///
/// let entry = AuditEntry::new("dispense", false, "slot 5 is not occupied")
///     .with_user(3)
///     .with_slot(5)
///     .with_reason("not-occupied");
///
/// assert_eq!(entry.slot_id, Some(5));
/// assert!(!entry.success);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    /// Zero until stored.
    pub id: i64,
    pub user_id: Option<i64>,
    pub slot_id: Option<i64>,
    pub record_id: Option<String>,
    pub process: String,
    pub success: bool,
    pub reason: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(process: impl Into<String>, success: bool, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            user_id: None,
            slot_id: None,
            record_id: None,
            process: process.into(),
            success,
            reason: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_slot(mut self, slot_id: i64) -> Self {
        self.slot_id = Some(slot_id);
        self
    }

    pub fn with_record(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
