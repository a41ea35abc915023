//! Oracle adapter over the `oracle` crate (ODPI-C) with a session pool.
//!
//! # Module Structure
//! - `connection`: Pool construction and per-checkout session setup
//! - `introspection`: `ALL_*` dictionary view reads
//! - `runner`: Statement execution and row decoding
//!
//! # Blocking Driver
//! ODPI-C calls block the calling thread. Every driver call runs inside
//! `tokio::task::spawn_blocking`; a checked-out `Connection` is moved into
//! the worker and handed back when the call returns.
//!
//! # Target Switching
//! Oracle has schemas rather than databases. A switch runs
//! `ALTER SESSION SET CURRENT_SCHEMA` on a live session; once accepted the
//! schema is committed and applied to every later checkout.

mod connection;
mod introspection;
mod runner;


use std::time::Duration;

use ::oracle::Connection;
use ::oracle::pool::Pool;
use async_trait::async_trait;
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

pub use connection::canonical_schema;
pub use runner::row_to_json;

/// Error codes meaning the session or the listener is gone.
const SESSION_LOST_CODES: &[&str] = &[
    "ORA-01012", "ORA-02396", "ORA-03113", "ORA-03114", "ORA-03135", "ORA-12170", "ORA-12514",
    "ORA-12541", "ORA-12543", "DPI-1010", "DPI-1080",
];

/// Oracle adapter.
pub struct OracleAdapter {
    config: ConnectionConfig,
    credentials: Option<Credentials>,
    pool: RwLock<Option<Pool>>,
    state: AdapterState,
}

impl std::fmt::Debug for OracleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleAdapter")
            .field("config", &self.config)
            .field("state", &self.state.get())
            .field("target", &self.state.target())
            // Note: credentials are intentionally omitted
            .finish_non_exhaustive()
    }
}

impl OracleAdapter {
    /// Creates a disconnected adapter.
    ///
    /// A configured database is taken as the initial schema, otherwise the
    /// login user's own schema.
    pub fn new(config: ConnectionConfig, credentials: Option<Credentials>) -> Self {
        let initial = config
            .database
            .as_deref()
            .or_else(|| credentials.as_ref().map(Credentials::username))
            .map(canonical_schema);
        Self {
            state: AdapterState::new(initial),
            config,
            credentials,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> Result<Pool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| DbBridgeError::no_active_connection("Oracle adapter is not connected"))
    }

    /// Checks out a session pointed at `schema` and runs `work` on it in a
    /// blocking worker, bounded by `limit`.
    async fn with_session<T, F>(
        &self,
        operation: &str,
        limit: Duration,
        schema: Option<String>,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce(Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool().await?;
        let call_timeout = self.config.query_timeout;
        with_timeout(
            operation,
            limit,
            blocking(move || {
                let conn = connection::checkout(&pool, schema.as_deref(), call_timeout)?;
                work(conn)
            }),
        )
        .await
    }

    /// Bound for catalog reads: one checkout plus one statement.
    fn catalog_limit(&self) -> Duration {
        self.config.connect_timeout.saturating_add(self.config.query_timeout)
    }
}

/// Runs a blocking driver call on tokio's blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DbBridgeError::connection_failed("Oracle worker task failed", e))?
}

fn is_session_lost(message: &str) -> bool {
    SESSION_LOST_CODES.iter().any(|code| message.contains(code))
}

/// Maps a driver failure on a user statement.
pub(crate) fn statement_error(error: ::oracle::Error) -> DbBridgeError {
    let message = error.to_string();
    if is_session_lost(&message) {
        DbBridgeError::connection_failed("oracle session lost", error)
    } else {
        classify_statement_error(EngineType::Oracle, message)
    }
}

#[async_trait]
impl EngineAdapter for OracleAdapter {
    fn engine_type(&self) -> EngineType {
        EngineType::Oracle
    }

    fn supports_feature(&self, feature: AdapterFeature) -> bool {
        matches!(
            feature,
            AdapterFeature::SwitchDatabase
                | AdapterFeature::Triggers
                | AdapterFeature::ForeignKeys
                | AdapterFeature::ConnectionPooling
                | AdapterFeature::QueryTimeout
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
                // ODPI-C closes the pool once the last handle is dropped
                drop(self.pool.write().await.replace(pool));
                self.state.bump_generation();
                self.state.set(ConnectionState::Connected);
                info!("Connected to Oracle at {}", self.config);
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
            // Dropping the last handle closes the pool, which may wait on the network
            if let Err(e) = blocking(move || {
                drop(pool);
                Ok(())
            })
            .await
            {
                warn!("Error while closing Oracle pool: {}", e);
            }
            info!("Disconnected from Oracle at {}", self.config);
        }
        self.state.set(ConnectionState::Disconnected);
        Ok(())
    }

    async fn validate_connection(&self) -> bool {
        let probe = self
            .with_session("validate connection", self.config.connect_timeout, None, |conn| {
                conn.ping()
                    .map_err(|e| DbBridgeError::connection_failed("Oracle ping failed", e))
            })
            .await;

        match probe {
            Ok(()) => true,
            Err(DbBridgeError::NoActiveConnection { .. }) => false,
            Err(e) => {
                warn!("Oracle connection validation failed: {}", e);
                self.state.set(ConnectionState::Error);
                false
            }
        }
    }

    async fn switch_database(&self, name: &str) -> Result<()> {
        validate_target_name(name)?;
        let schema = canonical_schema(name);

        self.with_session(
            "switch schema",
            self.config.connect_timeout,
            Some(schema.clone()),
            |_conn| Ok(()),
        )
        .await?;

        info!("Oracle connection now targets schema '{}'", schema);
        self.state.commit_target(Some(schema));
        Ok(())
    }

    async fn get_databases(&self) -> Result<Vec<DatabaseDescriptor>> {
        let target = self.state.target();
        let current = target.clone();
        self.with_session("list schemas", self.catalog_limit(), target, move |conn| {
            introspection::list_schemas(&conn, current.as_deref())
        })
        .await
    }

    async fn get_tables(&self, database: &str) -> Result<Vec<TableDescriptor>> {
        let owner = canonical_schema(database);
        self.with_session("list tables", self.catalog_limit(), self.state.target(), move |conn| {
            introspection::list_tables(&conn, &owner)
        })
        .await
    }

    async fn get_table_info(&self, database: &str, table: &str) -> Result<TableInfo> {
        let owner = canonical_schema(database);
        let table = table.to_string();
        self.with_session("describe table", self.catalog_limit(), self.state.target(), move |conn| {
            introspection::describe_table(&conn, &owner, &table)
        })
        .await
    }

    async fn execute_query(&self, text: &str, page: PageRequest) -> Result<QueryBatchResult> {
        let conn = self
            .with_session(
                "acquire connection",
                self.config.connect_timeout,
                self.state.target(),
                Ok,
            )
            .await?;
        let mut runner = runner::OracleRunner::new(conn, self.config.query_timeout);
        Ok(run_batch(&mut runner, text, page).await)
    }

    fn connection_stats(&self) -> ConnectionStats {
        let (pool_size, in_use) = self
            .pool
            .try_read()
            .ok()
            .and_then(|guard| guard.as_ref().map(connection::pool_counts))
            .unwrap_or((0, 0));

        ConnectionStats {
            engine: EngineType::Oracle,
            state: self.state.get(),
            target: self.state.target(),
            pool_size,
            idle_connections: pool_size.saturating_sub(in_use),
            in_use,
            max_connections: self.config.max_connections,
            pool_generation: self.state.generation(),
        }
    }
}
