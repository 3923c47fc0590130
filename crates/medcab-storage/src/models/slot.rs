use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persistent bookkeeping of one physical slot.
///
/// # Fields
///
/// * `slot_id` - One-based slot number (primary key)
/// * `occupied` - Medication has been loaded and locked back
/// * `record_id` - Patient/medication record the slot is loaded for
/// * `opening` - An unlock or dispense workflow is in progress on the slot
/// * `active` - Cleared by deactivation; inactive slots refuse operations
/// * `updated_at` - Last modification
///
/// # Examples
///
/// ```
/// use medcab_storage::models::SlotRecord;
/// use chrono::Utc;
///
/// let slot = SlotRecord {
///     slot_id: 5,
///     occupied: true,
///     record_id: Some("HN1".to_string()),
///     opening: false,
///     active: true,
///     updated_at: Utc::now(),
/// };
///
/// assert!(slot.can_dispense());
/// assert_eq!(slot.record_id(), Some("HN1"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SlotRecord {
    pub slot_id: i64,
    pub occupied: bool,
    pub record_id: Option<String>,
    pub opening: bool,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl SlotRecord {
    /// Record id, treating a blank value as absent.
    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// Occupied with a non-empty record id.
    pub fn can_dispense(&self) -> bool {
        self.occupied && self.record_id().is_some()
    }
}

/// Partial update of a [`SlotRecord`]; `None` fields are left unchanged.
///
/// Applied by a single `UPDATE` statement so the row is changed
/// atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotUpdate {
    pub occupied: Option<bool>,
    /// `Some(None)` clears the record id.
    pub record_id: Option<Option<String>>,
    pub opening: Option<bool>,
    pub active: Option<bool>,
}

impl SlotUpdate {
    /// Workflow started on the slot.
    pub fn opening(opening: bool) -> Self {
        Self {
            opening: Some(opening),
            ..Self::default()
        }
    }

    /// Medication loaded and locked back.
    pub fn loaded(record_id: impl Into<String>) -> Self {
        Self {
            occupied: Some(true),
            record_id: Some(Some(record_id.into())),
            opening: Some(false),
            ..Self::default()
        }
    }

    /// Medication picked up, or slot reset.
    pub fn emptied() -> Self {
        Self {
            occupied: Some(false),
            record_id: Some(None),
            opening: Some(false),
            ..Self::default()
        }
    }

    /// Deactivate or reactivate; also clears a stale opening flag.
    pub fn active(active: bool) -> Self {
        Self {
            active: Some(active),
            opening: Some(false),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
