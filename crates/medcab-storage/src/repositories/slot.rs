use crate::error::{StorageError, StorageResult};
use crate::models::{SlotRecord, SlotUpdate};
use chrono::Utc;
use sqlx::SqlitePool;
use std::future::Future;

/// Repository trait for slot bookkeeping.
///
/// Methods return `Send` futures so callers can drive them from spawned
/// tasks.
pub trait SlotRepository: Send + Sync {
    /// Find a slot by its one-based id
    fn find_slot(&self, slot_id: i64)
    -> impl Future<Output = StorageResult<Option<SlotRecord>>> + Send;

    /// All slots, ordered by id
    fn find_all(&self) -> impl Future<Output = StorageResult<Vec<SlotRecord>>> + Send;

    /// Apply `update` atomically.
    ///
    /// Fails with [`StorageError::NotFound`] if the slot does not exist.
    fn update_slot(
        &self,
        slot_id: i64,
        update: &SlotUpdate,
    ) -> impl Future<Output = StorageResult<()>> + Send;

    /// Provision rows `1..=count`, leaving existing rows untouched.
    fn ensure_slots(&self, count: u8) -> impl Future<Output = StorageResult<()>> + Send;
}

/// SQLite implementation of SlotRepository
#[derive(Debug, Clone)]
pub struct SqliteSlotRepository {
    pool: SqlitePool,
}

impl SqliteSlotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl SlotRepository for SqliteSlotRepository {
    async fn find_slot(&self, slot_id: i64) -> StorageResult<Option<SlotRecord>> {
        let slot = sqlx::query_as::<_, SlotRecord>(
            r#"
            SELECT slot_id, occupied, record_id, opening, active, updated_at
            FROM slots
            WHERE slot_id = ?
            "#,
        )
        .bind(slot_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(slot)
    }

    async fn find_all(&self) -> StorageResult<Vec<SlotRecord>> {
        let slots = sqlx::query_as::<_, SlotRecord>(
            r#"
            SELECT slot_id, occupied, record_id, opening, active, updated_at
            FROM slots
            ORDER BY slot_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(slots)
    }

    async fn update_slot(&self, slot_id: i64, update: &SlotUpdate) -> StorageResult<()> {
        let (set_record, record_id) = match &update.record_id {
            Some(value) => (true, value.clone()),
            None => (false, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE slots
            SET occupied = COALESCE(?, occupied),
                record_id = CASE WHEN ? THEN ? ELSE record_id END,
                opening = COALESCE(?, opening),
                active = COALESCE(?, active),
                updated_at = ?
            WHERE slot_id = ?
            "#,
        )
        .bind(update.occupied)
        .bind(set_record)
        .bind(record_id)
        .bind(update.opening)
        .bind(update.active)
        .bind(Utc::now())
        .bind(slot_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("Slot", "slot_id", slot_id));
        }

        Ok(())
    }

    async fn ensure_slots(&self, count: u8) -> StorageResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for slot_id in 1..=i64::from(count) {
            sqlx::query("INSERT OR IGNORE INTO slots (slot_id, updated_at) VALUES (?, ?)")
                .bind(slot_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
