//! The in-flight operation record.

use chrono::{DateTime, Utc};
use medcab_core::{RecordId, SlotId};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Which workflow owns the context. Decides where an unlock
/// acknowledgement is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Unlock,
    Dispense,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unlock => "unlock",
            Self::Dispense => "dispense",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slot, record and operator of the workflow in progress.
///
/// Created when an operation starts, dropped when it completes or is
/// aborted. The `id` correlates log lines of one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationContext {
    pub id: Uuid,
    pub kind: OperationKind,
    pub slot: SlotId,
    pub record_id: RecordId,
    pub user_id: i64,
    pub started_at: DateTime<Utc>,
}

impl OperationContext {
    pub fn new(kind: OperationKind, slot: SlotId, record_id: RecordId, user_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            slot,
            record_id,
            user_id,
            started_at: Utc::now(),
        }
    }
}
