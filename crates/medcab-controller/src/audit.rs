//! One audit entry per outcome.
//!
//! Operations fill an [`Attempt`] as they learn who, which slot and which
//! record is involved, then hand it to [`AuditRecorder::finish`] together
//! with their result. That call is the only place an operation writes to
//! the audit trail. A failing audit write is logged and swallowed: the
//! trail must not be able to abort a hardware operation.

use medcab_storage::{AuditEntry, AuditLogRepository};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{OperationError, ReasonCode};

/// Audit fields gathered while an operation runs.
#[derive(Debug, Clone)]
pub struct Attempt {
    process: &'static str,
    user_id: Option<i64>,
    slot_id: Option<i64>,
    record_id: Option<String>,
}

impl Attempt {
    pub fn new(process: &'static str) -> Self {
        Self {
            process,
            user_id: None,
            slot_id: None,
            record_id: None,
        }
    }

    pub fn slot(mut self, slot_id: i64) -> Self {
        self.slot_id = Some(slot_id);
        self
    }

    pub fn record(mut self, record_id: &str) -> Self {
        let record_id = record_id.trim();
        if !record_id.is_empty() {
            self.record_id = Some(record_id.to_string());
        }
        self
    }

    pub fn set_user(&mut self, user_id: i64) {
        self.user_id = Some(user_id);
    }

    pub fn process(&self) -> &'static str {
        self.process
    }

    pub fn slot_id(&self) -> Option<i64> {
        self.slot_id
    }

    fn entry(&self, success: bool, message: String) -> AuditEntry {
        let mut entry = AuditEntry::new(self.process, success, message);
        entry.user_id = self.user_id;
        entry.slot_id = self.slot_id;
        entry.record_id = self.record_id.clone();
        entry
    }
}

pub struct AuditRecorder<S> {
    store: Arc<S>,
}

impl<S> Clone for AuditRecorder<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: AuditLogRepository> AuditRecorder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Record the outcome of `attempt`.
    pub async fn finish<T>(
        &self,
        attempt: &Attempt,
        result: &Result<T, OperationError>,
        success_message: impl FnOnce() -> String,
    ) {
        let entry = match result {
            Ok(_) => attempt.entry(true, success_message()),
            Err(e) => attempt
                .entry(false, e.to_string())
                .with_reason(e.reason_code().as_str()),
        };
        self.write(entry).await;
    }

    /// Record a successful workflow step outside a public operation.
    pub async fn success(&self, attempt: &Attempt, message: impl Into<String>) {
        self.write(attempt.entry(true, message.into())).await;
    }

    /// Record a fault that has no caller to return to.
    pub async fn failure(&self, attempt: &Attempt, reason: ReasonCode, message: impl Into<String>) {
        let entry = attempt
            .entry(false, message.into())
            .with_reason(reason.as_str());
        self.write(entry).await;
    }

    async fn write(&self, entry: AuditEntry) {
        if entry.success {
            info!(process = %entry.process, slot_id = ?entry.slot_id, "{}", entry.message);
        } else {
            warn!(
                process = %entry.process,
                slot_id = ?entry.slot_id,
                reason = ?entry.reason,
                "{}",
                entry.message
            );
        }
        if let Err(e) = self.store.append(&entry).await {
            error!(process = %entry.process, error = %e, "Failed to write audit entry");
        }
    }
}
