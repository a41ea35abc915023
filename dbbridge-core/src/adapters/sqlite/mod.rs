//! SQLite adapter for embedded file and in-memory databases.
//!
//! # Module Structure
//! - `connection`: Pool construction from the configured file path
//! - `introspection`: Catalog reads via `sqlite_master` and PRAGMA functions
//! - `runner`: Statement execution and row decoding on one pooled connection
//!
//! # SQLite-Specific Behavior
//! - There is no database switching; attached schemas are listed as databases
//! - `:memory:` databases keep exactly one connection alive, since each new
//!   connection would see a fresh empty database
//! - Foreign key enforcement is enabled on every connection

mod connection;
mod introspection;
mod runner;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::helpers::AdapterState;
use super::{AdapterFeature, ConnectionConfig, EngineAdapter};
use crate::Result;
use crate::error::DbBridgeError;
use crate::models::{
    ConnectionState, ConnectionStats, DatabaseDescriptor, EngineType, PageRequest,
    QueryBatchResult, TableDescriptor, TableInfo,
};
use crate::query::{run_batch, with_timeout};

pub use runner::row_to_json;

/// Schema name SQLite gives the primary database file.
pub const MAIN_SCHEMA: &str = "main";

/// SQLite adapter with a lazily built connection pool.
pub struct SqliteAdapter {
    config: ConnectionConfig,
    pool: RwLock<Option<SqlitePool>>,
    state: AdapterState,
}

impl std::fmt::Debug for SqliteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAdapter")
            .field("config", &self.config)
            .field("state", &self.state.get())
            .field("is_in_memory", &self.config.is_in_memory())
            .finish_non_exhaustive()
    }
}

impl SqliteAdapter {
    /// Creates a disconnected adapter.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            pool: RwLock::new(None),
            state: AdapterState::new(Some(MAIN_SCHEMA.to_string())),
        }
    }

    async fn pool(&self) -> Result<SqlitePool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| DbBridgeError::no_active_connection("SQLite adapter is not connected"))
    }
}

#[async_trait]
impl EngineAdapter for SqliteAdapter {
    fn engine_type(&self) -> EngineType {
        EngineType::Sqlite
    }

    fn supports_feature(&self, feature: AdapterFeature) -> bool {
        match feature {
            AdapterFeature::SwitchDatabase => false,
            AdapterFeature::Triggers
            | AdapterFeature::ForeignKeys
            | AdapterFeature::QueryTimeout
            | AdapterFeature::SizeOnDisk => true,
            AdapterFeature::ConnectionPooling => !self.config.is_in_memory(),
        }
    }

    fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn current_target(&self) -> Option<String> {
        self.state.target()
    }

    async fn connect(&self) -> Result<()> {
        if self.state.is_connected() && self.pool.read().await.is_some() {
            return Ok(());
        }

        self.state.set(ConnectionState::Connecting);
        let result = with_timeout("connect", self.config.connect_timeout, self.open_pool()).await;

        match result {
            Ok(pool) => {
                let previous = self.pool.write().await.replace(pool);
                if let Some(previous) = previous {
                    previous.close().await;
                }
                self.state.bump_generation();
                self.state.set(ConnectionState::Connected);
                info!("Opened SQLite database {}", self.config);
                Ok(())
            }
            Err(e) => {
                self.state.set(ConnectionState::Error);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            info!("Closed SQLite database {}", self.config);
        }
        self.state.set(ConnectionState::Disconnected);
        Ok(())
    }

    async fn validate_connection(&self) -> bool {
        let Ok(pool) = self.pool().await else {
            return false;
        };

        let probe = with_timeout("validate connection", self.config.connect_timeout, async {
            sqlx::query_scalar::<_, i64>("SELECT 1")
                .fetch_one(&pool)
                .await
                .map_err(|e| DbBridgeError::connection_failed("SQLite validation query failed", e))
        })
        .await;

        match probe {
            Ok(_) => true,
            Err(e) => {
                warn!("SQLite connection validation failed: {}", e);
                self.state.set(ConnectionState::Error);
                false
            }
        }
    }

    async fn switch_database(&self, _name: &str) -> Result<()> {
        Err(DbBridgeError::unsupported("switch_database", EngineType::Sqlite))
    }

    async fn get_databases(&self) -> Result<Vec<DatabaseDescriptor>> {
        let pool = self.pool().await?;
        introspection::list_databases(&pool).await
    }

    async fn get_tables(&self, database: &str) -> Result<Vec<TableDescriptor>> {
        let pool = self.pool().await?;
        let schema = introspection::resolve_schema(&pool, &self.config, database).await?;
        introspection::list_tables(&pool, &schema).await
    }

    async fn get_table_info(&self, database: &str, table: &str) -> Result<TableInfo> {
        let pool = self.pool().await?;
        let schema = introspection::resolve_schema(&pool, &self.config, database).await?;
        introspection::describe_table(&pool, database, &schema, table).await
    }

    async fn execute_query(&self, text: &str, page: PageRequest) -> Result<QueryBatchResult> {
        let pool = self.pool().await?;
        let conn = with_timeout("acquire connection", self.config.connect_timeout, async {
            pool.acquire()
                .await
                .map_err(|e| DbBridgeError::connection_failed("Failed to acquire SQLite connection", e))
        })
        .await?;

        let mut runner = runner::SqliteRunner::new(conn, self.config.query_timeout);
        Ok(run_batch(&mut runner, text, page).await)
    }

    fn connection_stats(&self) -> ConnectionStats {
        let (pool_size, idle) = self
            .pool
            .try_read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|pool| (pool.size(), pool.num_idle())))
            .unwrap_or((0, 0));
        let idle = u32::try_from(idle).unwrap_or(u32::MAX);

        ConnectionStats {
            engine: EngineType::Sqlite,
            state: self.state.get(),
            target: self.state.target(),
            pool_size,
            idle_connections: idle,
            in_use: pool_size.saturating_sub(idle),
            max_connections: self.effective_max_connections(),
            pool_generation: self.state.generation(),
        }
    }
}
