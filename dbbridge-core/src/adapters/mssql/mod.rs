//! SQL Server adapter over tiberius with a bb8 connection pool.
//!
//! # Module Structure
//! - `connection`: Client config, pool construction and per-checkout `USE`
//! - `introspection`: `sys` catalog reads, database-qualified
//! - `runner`: Statement execution and row decoding
//!
//! # Target Switching
//! As with MySQL, the current database is applied with `USE [db]` to every
//! checked-out client, and a switch is committed only after `USE` succeeded
//! on a live session.

mod connection;
mod introspection;
mod runner;


use async_trait::async_trait;
use bb8_tiberius::ConnectionManager;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::helpers::AdapterState;
use super::{AdapterFeature, ConnectionConfig, EngineAdapter, validate_target_name};
use crate::Result;
use crate::error::{DbBridgeError, classify_statement_error};
use crate::models::{
    ConnectionState, ConnectionStats, DatabaseDescriptor, EngineType, PageRequest,
    QueryBatchResult, TableDescriptor, TableInfo,
};
use crate::query::{run_batch, with_timeout};
use crate::security::Credentials;

pub use runner::row_to_json;

/// Pool of tiberius clients.
pub type SqlServerPool = bb8::Pool<ConnectionManager>;

pub(crate) type PooledClient = bb8::PooledConnection<'static, ConnectionManager>;

/// SQL Server adapter.
pub struct SqlServerAdapter {
    config: ConnectionConfig,
    credentials: Option<Credentials>,
    pool: RwLock<Option<SqlServerPool>>,
    state: AdapterState,
}

impl std::fmt::Debug for SqlServerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlServerAdapter")
            .field("config", &self.config)
            .field("state", &self.state.get())
            .field("target", &self.state.target())
            // Note: credentials are intentionally omitted
            .finish_non_exhaustive()
    }
}

impl SqlServerAdapter {
    /// Creates a disconnected adapter.
    pub fn new(config: ConnectionConfig, credentials: Option<Credentials>) -> Self {
        Self {
            state: AdapterState::new(config.database.clone()),
            config,
            credentials,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> Result<SqlServerPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| DbBridgeError::no_active_connection("SQL Server adapter is not connected"))
    }

    /// Checks out a client already pointed at the current target.
    async fn session(&self) -> Result<PooledClient> {
        let pool = self.pool().await?;
        let target = self.state.target();
        with_timeout("acquire connection", self.config.connect_timeout, async {
            let mut conn = connection::checkout(&pool).await?;
            if let Some(target) = &target {
                connection::use_database(&mut conn, target).await?;
            }
            Ok(conn)
        })
        .await
    }
}

/// Maps a tiberius failure on a user statement.
pub(crate) fn statement_error(error: tiberius::error::Error) -> DbBridgeError {
    match error {
        tiberius::error::Error::Io { .. } | tiberius::error::Error::Routing { .. } => {
            DbBridgeError::connection_failed("sqlserver session lost", error)
        }
        other => classify_statement_error(EngineType::SqlServer, other.to_string()),
    }
}

#[async_trait]
impl EngineAdapter for SqlServerAdapter {
    fn engine_type(&self) -> EngineType {
        EngineType::SqlServer
    }

    fn supports_feature(&self, feature: AdapterFeature) -> bool {
        matches!(
            feature,
            AdapterFeature::SwitchDatabase
                | AdapterFeature::Triggers
                | AdapterFeature::ForeignKeys
                | AdapterFeature::ConnectionPooling
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
                // bb8 closes connections once the last pool handle is dropped
                drop(self.pool.write().await.replace(pool));
                self.state.bump_generation();
                self.state.set(ConnectionState::Connected);
                info!("Connected to SQL Server at {}", self.config);
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
        if pool.is_some() {
            drop(pool);
            info!("Disconnected from SQL Server at {}", self.config);
        }
        self.state.set(ConnectionState::Disconnected);
        Ok(())
    }

    async fn validate_connection(&self) -> bool {
        let Ok(pool) = self.pool().await else {
            return false;
        };

        let probe = with_timeout("validate connection", self.config.connect_timeout, async {
            let mut conn = connection::checkout(&pool).await?;
            conn.simple_query("SELECT 1")
                .await
                .map_err(|e| DbBridgeError::connection_failed("SQL Server validation query failed", e))?
                .into_results()
                .await
                .map_err(|e| DbBridgeError::connection_failed("SQL Server validation query failed", e))
        })
        .await;

        match probe {
            Ok(_) => true,
            Err(e) => {
                warn!("SQL Server connection validation failed: {}", e);
                self.state.set(ConnectionState::Error);
                false
            }
        }
    }

    async fn switch_database(&self, name: &str) -> Result<()> {
        validate_target_name(name)?;
        let pool = self.pool().await?;

        with_timeout("switch database", self.config.connect_timeout, async {
            let mut conn = connection::checkout(&pool).await?;
            connection::use_database(&mut conn, name).await
        })
        .await?;

        self.state.commit_target(Some(name.to_string()));
        info!("SQL Server connection now targets database '{}'", name);
        Ok(())
    }

    async fn get_databases(&self) -> Result<Vec<DatabaseDescriptor>> {
        let mut conn = self.session().await?;
        introspection::list_databases(&mut conn, self.state.target().as_deref()).await
    }

    async fn get_tables(&self, database: &str) -> Result<Vec<TableDescriptor>> {
        let mut conn = self.session().await?;
        introspection::list_tables(&mut conn, database).await
    }

    async fn get_table_info(&self, database: &str, table: &str) -> Result<TableInfo> {
        let mut conn = self.session().await?;
        introspection::describe_table(&mut conn, database, table).await
    }

    async fn execute_query(&self, text: &str, page: PageRequest) -> Result<QueryBatchResult> {
        let conn = self.session().await?;
        let mut runner = runner::SqlServerRunner::new(conn, self.config.query_timeout);
        Ok(run_batch(&mut runner, text, page).await)
    }

    fn connection_stats(&self) -> ConnectionStats {
        let (pool_size, idle) = self
            .pool
            .try_read()
            .ok()
            .and_then(|guard| {
                guard.as_ref().map(|pool| {
                    let state = pool.state();
                    (state.connections, state.idle_connections)
                })
            })
            .unwrap_or((0, 0));

        ConnectionStats {
            engine: EngineType::SqlServer,
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
