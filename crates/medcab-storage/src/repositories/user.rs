use crate::error::StorageResult;
use crate::models::UserRecord;
use chrono::Utc;
use medcab_core::Credential;
use sqlx::SqlitePool;
use std::future::Future;

/// Repository trait for cabinet operators.
pub trait UserRepository: Send + Sync {
    /// Active user whose passkey matches `credential`.
    fn find_user(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = StorageResult<Option<UserRecord>>> + Send;

    fn find_by_id(&self, id: i64) -> impl Future<Output = StorageResult<Option<UserRecord>>> + Send;

    fn find_all_active(&self) -> impl Future<Output = StorageResult<Vec<UserRecord>>> + Send;

    /// Insert a user; `id` and `created_at` of `user` are ignored.
    fn create(&self, user: &UserRecord) -> impl Future<Output = StorageResult<i64>> + Send;
}

/// SQLite implementation of UserRepository
#[derive(Debug, Clone)]
pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl UserRepository for SqliteUserRepository {
    async fn find_user(&self, credential: &Credential) -> StorageResult<Option<UserRecord>> {
        // Compared in Rust so the lookup is constant-time per candidate
        let users = self.find_all_active().await?;
        Ok(users.into_iter().find(|user| user.verify(credential)))
    }

    async fn find_by_id(&self, id: i64) -> StorageResult<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, name, role, passkey, active, created_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_all_active(&self) -> StorageResult<Vec<UserRecord>> {
        let users = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, name, role, passkey, active, created_at
            FROM users
            WHERE active = 1
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn create(&self, user: &UserRecord) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (name, role, passkey, active, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.name)
        .bind(&user.role)
        .bind(&user.passkey)
        .bind(user.active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}
