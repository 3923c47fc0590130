use crate::error::{StorageError, StorageResult};
use serde::Deserialize;
use sqlx::ConnectOptions;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_DATABASE_PATH: &str = "medcab.db";

/// Pool and file settings for the cabinet database.
///
/// ```
/// use medcab_storage::DatabaseConfig;
///
/// let config: DatabaseConfig =
///     serde_json::from_str(r#"{ "path": "/var/lib/medcab/cabinet.db" }"#).unwrap();
/// assert_eq!(config.pool_size, 4);
/// assert!(config.run_migrations);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub pool_size: u32,
    /// Connections kept open while idle.
    pub min_idle: u32,
    pub connection_lifetime_secs: u64,
    pub acquire_timeout_ms: u64,
    pub create_if_missing: bool,
    /// Apply pending migrations on open.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DATABASE_PATH.to_string(),
            pool_size: 4,
            min_idle: 1,
            connection_lifetime_secs: 30 * 60,
            acquire_timeout_ms: 10_000,
            create_if_missing: true,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_min_idle(mut self, min_idle: u32) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn with_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    pub fn connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.connection_lifetime_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// # Errors
    /// [`StorageError::Configuration`] for a blank path, an empty pool or
    /// more idle connections than the pool holds.
    pub fn validate(&self) -> StorageResult<()> {
        if self.path.trim().is_empty() {
            return Err(StorageError::Configuration(
                "database path must not be empty".to_string(),
            ));
        }
        if self.pool_size == 0 || self.min_idle > self.pool_size {
            return Err(StorageError::Configuration(format!(
                "invalid pool size: {} idle of {}",
                self.min_idle, self.pool_size
            )));
        }
        Ok(())
    }
}

/// Handle to the migrated SQLite pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the pool, creating the file and running migrations as configured.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use medcab_storage::connection::{Database, DatabaseConfig};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = DatabaseConfig::new("data/medcab.db").with_pool_size(2);
    /// let db = Database::new(config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(config: DatabaseConfig) -> StorageResult<Self> {
        config.validate()?;

        if let Some(parent) = Path::new(&config.path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Configuration(format!("Failed to create database directory: {}", e))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.path))
            .map_err(|e| StorageError::Configuration(format!("Invalid database path: {}", e)))?
            .create_if_missing(config.create_if_missing)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .min_connections(config.min_idle)
            .max_lifetime(Some(config.connection_lifetime()))
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await?;

        let db = Self { pool };
        if config.run_migrations {
            db.migrate().await?;
        }

        info!(path = %config.path, "Database opened");
        Ok(db)
    }

    /// Single-connection in-memory database, migrated.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Apply the embedded migrations. Already-applied ones are skipped.
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        debug!("Migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_builder() {
        let config = DatabaseConfig::new("test.db")
            .with_pool_size(5)
            .with_min_idle(2)
            .with_create_if_missing(false)
            .with_migrations(false);

        assert_eq!(config.path, "test.db");
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.min_idle, 2);
        assert!(!config.create_if_missing);
        assert!(!config.run_migrations);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseConfig::default();

        assert_eq!(config.path, "medcab.db");
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(10));
        assert_eq!(config.connection_lifetime(), Duration::from_secs(1800));
        assert!(config.create_if_missing);
        assert!(config.run_migrations);
    }

    #[test]
    fn test_database_config_from_json() {
        let config: DatabaseConfig =
            serde_json::from_str(r#"{ "path": "cab.db", "pool_size": 2, "min_idle": 0 }"#)
                .unwrap();

        assert_eq!(config.path, "cab.db");
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.min_idle, 0);
        assert!(config.run_migrations);
    }

    #[test]
    fn test_database_config_invalid() {
        assert!(DatabaseConfig::new(" ").validate().is_err());
        assert!(DatabaseConfig::default().with_pool_size(0).validate().is_err());
        assert!(
            DatabaseConfig::default()
                .with_pool_size(1)
                .with_min_idle(2)
                .validate()
                .is_err()
        );
    }
}
