//! In-memory adapter used by registry and context unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use super::helpers::AdapterState;
use super::{AdapterFeature, ConnectionConfig, EngineAdapter};
use crate::Result;
use crate::error::DbBridgeError;
use crate::models::{
    ConnectionState, ConnectionStats, DatabaseDescriptor, EngineType, PageRequest,
    QueryBatchResult, QueryResultEntry, StatementKind, TableDescriptor, TableInfo,
};

#[derive(Debug)]
pub(crate) struct MockAdapter {
    config: ConnectionConfig,
    state: AdapterState,
    pub fail_connect: AtomicBool,
    pub fail_validate: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl MockAdapter {
    pub(crate) fn new(engine: EngineType) -> Self {
        let config = if engine == EngineType::Sqlite {
            ConnectionConfig::sqlite(":memory:")
        } else {
            ConnectionConfig::new(engine, "mock.local").with_database("main")
        };
        Self {
            state: AdapterState::new(config.database.clone()),
            config,
            fail_connect: AtomicBool::new(false),
            fail_validate: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(engine: EngineType) -> Self {
        let adapter = Self::new(engine);
        adapter.fail_connect.store(true, Ordering::SeqCst);
        adapter
    }
}

#[async_trait]
impl EngineAdapter for MockAdapter {
    fn engine_type(&self) -> EngineType {
        self.config.engine
    }

    fn supports_feature(&self, feature: AdapterFeature) -> bool {
        feature != AdapterFeature::SwitchDatabase || self.config.engine != EngineType::Sqlite
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
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            self.state.set(ConnectionState::Error);
            return Err(DbBridgeError::connection_failed(
                "mock connect refused",
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            ));
        }
        self.state.bump_generation();
        self.state.set(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state.set(ConnectionState::Disconnected);
        Ok(())
    }

    async fn validate_connection(&self) -> bool {
        if self.fail_validate.load(Ordering::SeqCst) {
            self.state.set(ConnectionState::Error);
            return false;
        }
        self.state.is_connected()
    }

    async fn switch_database(&self, name: &str) -> Result<()> {
        if self.config.engine == EngineType::Sqlite {
            return Err(DbBridgeError::unsupported("switch_database", self.config.engine));
        }
        if name == "missing" {
            return Err(DbBridgeError::query_failed("Unknown database 'missing'"));
        }
        self.state.commit_target(Some(name.to_string()));
        Ok(())
    }

    async fn get_databases(&self) -> Result<Vec<DatabaseDescriptor>> {
        Ok(vec![DatabaseDescriptor::new("main")])
    }

    async fn get_tables(&self, _database: &str) -> Result<Vec<TableDescriptor>> {
        Ok(Vec::new())
    }

    async fn get_table_info(&self, database: &str, table: &str) -> Result<TableInfo> {
        if table == "broken" {
            return Err(DbBridgeError::introspection_failed(table, "catalog lookup failed"));
        }
        Ok(TableInfo::empty(database, None, table))
    }

    async fn execute_query(&self, text: &str, _page: PageRequest) -> Result<QueryBatchResult> {
        if !self.state.is_connected() {
            return Err(DbBridgeError::no_active_connection("mock adapter is not connected"));
        }
        let entry = QueryResultEntry::new(text, StatementKind::Select);
        Ok(QueryBatchResult {
            queries: vec![entry],
            total_queries: 1,
            executed_at: Utc::now(),
        })
    }

    fn connection_stats(&self) -> ConnectionStats {
        ConnectionStats {
            engine: self.config.engine,
            state: self.state.get(),
            target: self.state.target(),
            pool_size: 1,
            idle_connections: 1,
            in_use: 0,
            max_connections: 1,
            pool_generation: self.state.generation(),
        }
    }
}
