//! All three repositories behind one handle.

use chrono::{DateTime, Utc};
use medcab_core::Credential;

use crate::connection::Database;
use crate::error::StorageResult;
use crate::models::{AuditEntry, SlotRecord, SlotUpdate, UserRecord};
use crate::repositories::{
    AuditLogRepository, SlotRepository, SqliteAuditLogRepository, SqliteSlotRepository,
    SqliteUserRepository, UserRepository,
};

/// Everything the cabinet controller persists.
pub trait CabinetStore:
    SlotRepository + UserRepository + AuditLogRepository + Send + Sync + 'static
{
}

impl<T> CabinetStore for T where
    T: SlotRepository + UserRepository + AuditLogRepository + Send + Sync + 'static
{
}

/// SQLite-backed [`CabinetStore`].
///
/// # Examples
///
/// ```no_run
/// use medcab_storage::{Database, SlotRepository, SqliteStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = SqliteStore::new(Database::in_memory().await?);
/// store.ensure_slots(12).await?;
/// assert_eq!(store.find_all().await?.len(), 12);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
    slots: SqliteSlotRepository,
    users: SqliteUserRepository,
    audit: SqliteAuditLogRepository,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        let pool = db.pool().clone();
        Self {
            slots: SqliteSlotRepository::new(pool.clone()),
            users: SqliteUserRepository::new(pool.clone()),
            audit: SqliteAuditLogRepository::new(pool),
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl SlotRepository for SqliteStore {
    async fn find_slot(&self, slot_id: i64) -> StorageResult<Option<SlotRecord>> {
        self.slots.find_slot(slot_id).await
    }

    async fn find_all(&self) -> StorageResult<Vec<SlotRecord>> {
        self.slots.find_all().await
    }

    async fn update_slot(&self, slot_id: i64, update: &SlotUpdate) -> StorageResult<()> {
        self.slots.update_slot(slot_id, update).await
    }

    async fn ensure_slots(&self, count: u8) -> StorageResult<()> {
        self.slots.ensure_slots(count).await
    }
}

impl UserRepository for SqliteStore {
    async fn find_user(&self, credential: &Credential) -> StorageResult<Option<UserRecord>> {
        self.users.find_user(credential).await
    }

    async fn find_by_id(&self, id: i64) -> StorageResult<Option<UserRecord>> {
        self.users.find_by_id(id).await
    }

    async fn find_all_active(&self) -> StorageResult<Vec<UserRecord>> {
        self.users.find_all_active().await
    }

    async fn create(&self, user: &UserRecord) -> StorageResult<i64> {
        self.users.create(user).await
    }
}

impl AuditLogRepository for SqliteStore {
    async fn append(&self, entry: &AuditEntry) -> StorageResult<i64> {
        self.audit.append(entry).await
    }

    async fn find_recent(&self, limit: i64) -> StorageResult<Vec<AuditEntry>> {
        self.audit.find_recent(limit).await
    }

    async fn find_by_slot(&self, slot_id: i64, limit: i64) -> StorageResult<Vec<AuditEntry>> {
        self.audit.find_by_slot(slot_id, limit).await
    }

    async fn find_by_process(&self, process: &str, limit: i64) -> StorageResult<Vec<AuditEntry>> {
        self.audit.find_by_process(process, limit).await
    }

    async fn count_failures_since(&self, since: DateTime<Utc>) -> StorageResult<i64> {
        self.audit.count_failures_since(since).await
    }
}
