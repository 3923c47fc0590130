use crate::error::StorageResult;
use crate::models::AuditEntry;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::future::Future;

/// Append-only audit trail.
pub trait AuditLogRepository: Send + Sync {
    /// Store `entry`, returning its row id.
    fn append(&self, entry: &AuditEntry) -> impl Future<Output = StorageResult<i64>> + Send;

    /// Newest first.
    fn find_recent(&self, limit: i64) -> impl Future<Output = StorageResult<Vec<AuditEntry>>> + Send;

    fn find_by_slot(
        &self,
        slot_id: i64,
        limit: i64,
    ) -> impl Future<Output = StorageResult<Vec<AuditEntry>>> + Send;

    fn find_by_process(
        &self,
        process: &str,
        limit: i64,
    ) -> impl Future<Output = StorageResult<Vec<AuditEntry>>> + Send;

    /// Failed entries recorded at or after `since`.
    fn count_failures_since(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = StorageResult<i64>> + Send;
}

/// SQLite implementation of AuditLogRepository
#[derive(Debug, Clone)]
pub struct SqliteAuditLogRepository {
    pool: SqlitePool,
}

impl SqliteAuditLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl AuditLogRepository for SqliteAuditLogRepository {
    async fn append(&self, entry: &AuditEntry) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_log (
                user_id, slot_id, record_id, process,
                success, reason, message, timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.slot_id)
        .bind(&entry.record_id)
        .bind(&entry.process)
        .bind(entry.success)
        .bind(&entry.reason)
        .bind(&entry.message)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn find_recent(&self, limit: i64) -> StorageResult<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, user_id, slot_id, record_id, process,
                   success, reason, message, timestamp
            FROM audit_log
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn find_by_slot(&self, slot_id: i64, limit: i64) -> StorageResult<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, user_id, slot_id, record_id, process,
                   success, reason, message, timestamp
            FROM audit_log
            WHERE slot_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(slot_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn find_by_process(&self, process: &str, limit: i64) -> StorageResult<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT id, user_id, slot_id, record_id, process,
                   success, reason, message, timestamp
            FROM audit_log
            WHERE process = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(process)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn count_failures_since(&self, since: DateTime<Utc>) -> StorageResult<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM audit_log
            WHERE success = 0 AND timestamp >= ?
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }
}
