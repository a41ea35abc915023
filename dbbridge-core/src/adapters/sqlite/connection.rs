//! SQLite pool construction.
//!
//! # Connection Modes
//! - File-based: the configured path, created only when `create_if_missing` is set
//! - In-memory: `:memory:`, pinned to a single never-expiring connection

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use super::SqliteAdapter;
use crate::Result;
use crate::error::DbBridgeError;

impl SqliteAdapter {
    /// Connections the pool may hold; always one for in-memory databases.
    pub(super) fn effective_max_connections(&self) -> u32 {
        if self.config.is_in_memory() {
            1
        } else {
            self.config.max_connections
        }
    }

    pub(super) fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let mut options = if self.config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
                DbBridgeError::connection_failed("Invalid in-memory SQLite options", e)
            })?
        } else {
            let path = self
                .config
                .file_path
                .as_ref()
                .ok_or_else(|| DbBridgeError::configuration("file_path is required for sqlite"))?;
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(self.config.options.create_if_missing)
        };

        options = options.foreign_keys(true);

        if let Some(mode) = &self.config.options.journal_mode {
            let mode = SqliteJournalMode::from_str(mode).map_err(|_| {
                DbBridgeError::configuration(format!("Unknown SQLite journal mode: {mode}"))
            })?;
            options = options.journal_mode(mode);
        }

        if let Some(busy_timeout) = self.config.options.busy_timeout {
            options = options.busy_timeout(busy_timeout);
        }

        Ok(options)
    }

    /// Opens the pool and proves it with a round-trip.
    pub(super) async fn open_pool(&self) -> Result<SqlitePool> {
        let options = self.connect_options()?;
        let in_memory = self.config.is_in_memory();

        let pool_options = SqlitePoolOptions::new()
            .max_connections(self.effective_max_connections())
            .acquire_timeout(self.config.connect_timeout);

        let pool_options = if in_memory {
            pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options
                .min_connections(self.config.min_connections)
                .idle_timeout(self.config.idle_timeout)
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            DbBridgeError::connection_failed(
                format!("Failed to open SQLite database {}", self.config),
                e,
            )
        })?;

        if let Err(e) = sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&pool).await {
            pool.close().await;
            return Err(DbBridgeError::connection_failed(
                "SQLite connectivity test failed",
                e,
            ));
        }

        Ok(pool)
    }
}
