//! MySQL/MariaDB adapter with connection pooling and session-level database
//! selection.
//!
//! # Module Structure
//! - `connection`: Connect options, pool construction and per-checkout `USE`
//! - `introspection`: `INFORMATION_SCHEMA` catalog reads
//! - `runner`: Statement execution and row decoding
//!
//! # Target Switching
//! The pool is shared by every request, so the current database is applied
//! with `USE` to each connection as it is checked out. A switch is committed
//! only after `USE` succeeded on a live session.

mod connection;
mod introspection;
mod runner;


use async_trait::async_trait;
use sqlx::MySqlPool;
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

/// MySQL adapter.
pub struct MySqlAdapter {
    config: ConnectionConfig,
    credentials: Option<Credentials>,
    pool: RwLock<Option<MySqlPool>>,
    state: AdapterState,
}

impl std::fmt::Debug for MySqlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlAdapter")
            .field("config", &self.config)
            .field("state", &self.state.get())
            .field("target", &self.state.target())
            // Note: credentials are intentionally omitted
            .finish_non_exhaustive()
    }
}

impl MySqlAdapter {
    /// Creates a disconnected adapter.
    pub fn new(config: ConnectionConfig, credentials: Option<Credentials>) -> Self {
        Self {
            state: AdapterState::new(config.database.clone()),
            config,
            credentials,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> Result<MySqlPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| DbBridgeError::no_active_connection("MySQL adapter is not connected"))
    }
}

#[async_trait]
impl EngineAdapter for MySqlAdapter {
    fn engine_type(&self) -> EngineType {
        EngineType::MySql
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
        match with_timeout("connect", self.config.connect_timeout, self.open_pool()).await {
            Ok(pool) => {
                let previous = self.pool.write().await.replace(pool);
                if let Some(previous) = previous {
                    previous.close().await;
                }
                self.state.bump_generation();
                self.state.set(ConnectionState::Connected);
                info!("Connected to MySQL at {}", self.config);
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
            info!("Disconnected from MySQL at {}", self.config);
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
                .map_err(|e| DbBridgeError::connection_failed("MySQL validation query failed", e))
        })
        .await;

        match probe {
            Ok(_) => true,
            Err(e) => {
                warn!("MySQL connection validation failed: {}", e);
                self.state.set(ConnectionState::Error);
                false
            }
        }
    }

    async fn switch_database(&self, name: &str) -> Result<()> {
        validate_target_name(name)?;
        let pool = self.pool().await?;

        with_timeout("switch database", self.config.connect_timeout, async {
            let mut conn = self.checkout(&pool).await?;
            connection::use_database(&mut conn, name).await
        })
        .await?;

        self.state.commit_target(Some(name.to_string()));
        info!("MySQL connection now targets database '{}'", name);
        Ok(())
    }

    async fn get_databases(&self) -> Result<Vec<DatabaseDescriptor>> {
        let pool = self.pool().await?;
        introspection::list_databases(&pool, self.state.target().as_deref()).await
    }

    async fn get_tables(&self, database: &str) -> Result<Vec<TableDescriptor>> {
        let pool = self.pool().await?;
        introspection::list_tables(&pool, database).await
    }

    async fn get_table_info(&self, database: &str, table: &str) -> Result<TableInfo> {
        let pool = self.pool().await?;
        introspection::describe_table(&pool, database, table).await
    }

    async fn execute_query(&self, text: &str, page: PageRequest) -> Result<QueryBatchResult> {
        let pool = self.pool().await?;
        let target = self.state.target();

        let conn = with_timeout("acquire connection", self.config.connect_timeout, async {
            let mut conn = self.checkout(&pool).await?;
            if let Some(target) = &target {
                connection::use_database(&mut conn, target).await?;
            }
            Ok(conn)
        })
        .await?;

        let mut runner = runner::MySqlRunner::new(conn, self.config.query_timeout);
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
            engine: EngineType::MySql,
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
