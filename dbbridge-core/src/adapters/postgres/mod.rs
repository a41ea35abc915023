//! PostgreSQL adapter with connection pooling.
//!
//! # Module Structure
//! - `connection`: Connect options and pool construction per database
//! - `introspection`: `pg_catalog` reads, including other databases on the server
//! - `runner`: Statement execution and row decoding
//!
//! # Target Switching
//! A PostgreSQL session is bound to one database for its lifetime, so
//! switching builds a fresh pool against the new database and only then
//! retires the old one. `ConnectionStats::pool_generation` changes with every
//! rebuild.

mod connection;
mod introspection;
mod runner;


use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::helpers::AdapterState;
use super::{AdapterFeature, ConnectionConfig, EngineAdapter, validate_target_name};
use crate::Result;
use crate::error::DbBridgeError;
use crate::models::{
    ConnectionState, ConnectionStats, DatabaseDescriptor, EngineType, PageRequest,
    QueryBatchResult, TableDescriptor, TableInfo,
};
use crate::query::{run_batch, with_timeout};
use crate::security::Credentials;

pub use runner::row_to_json;

/// Database the server accepts when none is configured.
pub const DEFAULT_DATABASE: &str = "postgres";

/// PostgreSQL adapter.
pub struct PostgresAdapter {
    config: ConnectionConfig,
    credentials: Option<Credentials>,
    pool: RwLock<Option<PgPool>>,
    state: AdapterState,
}

impl std::fmt::Debug for PostgresAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresAdapter")
            .field("config", &self.config)
            .field("state", &self.state.get())
            .field("target", &self.state.target())
            .field("pool_generation", &self.state.generation())
            // Note: credentials are intentionally omitted
            .finish_non_exhaustive()
    }
}

impl PostgresAdapter {
    /// Creates a disconnected adapter.
    pub fn new(config: ConnectionConfig, credentials: Option<Credentials>) -> Self {
        let target = config
            .database
            .clone()
            .or_else(|| Some(DEFAULT_DATABASE.to_string()));
        Self {
            state: AdapterState::new(target),
            config,
            credentials,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> Result<PgPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| DbBridgeError::no_active_connection("PostgreSQL adapter is not connected"))
    }

    fn current_database(&self) -> String {
        self.state
            .target()
            .unwrap_or_else(|| DEFAULT_DATABASE.to_string())
    }

    /// The live pool together with the database it is bound to.
    ///
    /// Both are read under the pool lock, so a concurrent switch is seen
    /// either entirely or not at all.
    async fn pool_with_database(&self) -> Result<(PgPool, String)> {
        let guard = self.pool.read().await;
        let pool = guard
            .clone()
            .ok_or_else(|| DbBridgeError::no_active_connection("PostgreSQL adapter is not connected"))?;
        Ok((pool, self.current_database()))
    }

    /// Swaps in a pool bound to `database` and hands back the previous one.
    ///
    /// The target and generation change under the pool write lock. Closing
    /// the previous pool waits for its checked-out connections and happens
    /// after the lock is released.
    async fn install_pool(&self, pool: PgPool, database: &str) -> Option<PgPool> {
        let mut guard = self.pool.write().await;
        self.state.commit_target(Some(database.to_string()));
        self.state.bump_generation();
        guard.replace(pool)
    }

    async fn retire_pool(previous: Option<PgPool>) {
        if let Some(previous) = previous {
            previous.close().await;
        }
    }
}

#[async_trait]
impl EngineAdapter for PostgresAdapter {
    fn engine_type(&self) -> EngineType {
        EngineType::PostgreSql
    }

    fn supports_feature(&self, feature: AdapterFeature) -> bool {
        matches!(
            feature,
            AdapterFeature::SwitchDatabase
                | AdapterFeature::Triggers
                | AdapterFeature::ForeignKeys
                | AdapterFeature::ConnectionPooling
                | AdapterFeature::QueryTimeout
                | AdapterFeature::SizeOnDisk
        )
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
        let database = self.current_database();
        let opened = with_timeout(
            "connect",
            self.config.connect_timeout,
            self.open_pool(&database, self.config.max_connections),
        )
        .await;

        match opened {
            Ok(pool) => {
                let previous = self.install_pool(pool, &database).await;
                self.state.set(ConnectionState::Connected);
                Self::retire_pool(previous).await;
                info!("Connected to PostgreSQL at {}", self.config);
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
            info!("Disconnected from PostgreSQL at {}", self.config);
        }
        self.state.set(ConnectionState::Disconnected);
        Ok(())
    }

    async fn validate_connection(&self) -> bool {
        let Ok(pool) = self.pool().await else {
            return false;
        };

        let probe = with_timeout("validate connection", self.config.connect_timeout, async {
            sqlx::query_scalar::<_, i32>("SELECT 1")
                .fetch_one(&pool)
                .await
                .map_err(|e| {
                    DbBridgeError::connection_failed("PostgreSQL validation query failed", e)
                })
        })
        .await;

        match probe {
            Ok(_) => true,
            Err(e) => {
                warn!("PostgreSQL connection validation failed: {}", e);
                self.state.set(ConnectionState::Error);
                false
            }
        }
    }

    async fn switch_database(&self, name: &str) -> Result<()> {
        validate_target_name(name)?;
        if self.pool.read().await.is_none() {
            return Err(DbBridgeError::no_active_connection(
                "PostgreSQL adapter is not connected",
            ));
        }

        // The old pool keeps serving until the new one is proven
        let pool = with_timeout(
            "switch database",
            self.config.connect_timeout,
            self.open_pool(name, self.config.max_connections),
        )
        .await?;

        let previous = self.install_pool(pool, name).await;
        info!(
            "PostgreSQL connection now targets database '{}' (pool generation {})",
            name,
            self.state.generation()
        );
        Self::retire_pool(previous).await;
        Ok(())
    }

    async fn get_databases(&self) -> Result<Vec<DatabaseDescriptor>> {
        let (pool, current) = self.pool_with_database().await?;
        introspection::list_databases(self, &pool, &current).await
    }

    async fn get_tables(&self, database: &str) -> Result<Vec<TableDescriptor>> {
        let catalog = self.catalog_pool(database).await?;
        let result = introspection::list_tables(catalog.pool()).await;
        catalog.release().await;
        result
    }

    async fn get_table_info(&self, database: &str, table: &str) -> Result<TableInfo> {
        let catalog = self.catalog_pool(database).await?;
        let result = introspection::describe_table(catalog.pool(), database, table).await;
        catalog.release().await;
        result
    }

    async fn execute_query(&self, text: &str, page: PageRequest) -> Result<QueryBatchResult> {
        let pool = self.pool().await?;
        let conn = with_timeout("acquire connection", self.config.connect_timeout, async {
            pool.acquire().await.map_err(|e| {
                DbBridgeError::connection_failed("Failed to acquire PostgreSQL connection", e)
            })
        })
        .await?;

        let mut runner = runner::PostgresRunner::new(conn, self.config.query_timeout);
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
            engine: EngineType::PostgreSql,
            state: self.state.get(),
            target: self.state.target(),
            pool_size,
            idle_connections: idle,
            in_use: pool_size.saturating_sub(idle),
            max_connections: self.config.max_connections,
            pool_generation: self.state.generation(),
        }
    }
}
