//! Connection registry: live `ConnectionId -> adapter` bindings.
//!
//! The registry owns every adapter it creates. Map reads run concurrently and
//! writes are serialized by an async `RwLock`; the lock is never held across
//! driver I/O, so operations on different connections never block each other.
//!
//! # Lifecycle
//! `create_connection` connects first and registers only on success. An entry
//! leaves the map on `close_connection`, `close_all_connections` or idle
//! eviction. Saved profiles (`load_connections`) are kept apart from live
//! entries until `connect_saved` brings one back under its saved id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::Result;
use crate::adapters::{ConnectionConfig, EngineAdapter, create_adapter};
use crate::error::DbBridgeError;
use crate::models::{
    AtomicConnectionState, ConnectionHealth, ConnectionId, ConnectionState, DatabaseDescriptor,
    EngineType, HealthStatus, PageRequest, QueryBatchResult, TableDescriptor, TableInfo,
};
use crate::security::Credentials;

/// Connections probed at once by [`ConnectionRegistry::health_check`].
const HEALTH_CHECK_CONCURRENCY: usize = 8;

/// Non-secret description of one connection.
///
/// This is the shape `save_connections` produces and `load_connections`
/// accepts back. Credentials are never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub engine: EngineType,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Current database or schema
    pub target: Option<String>,
    pub state: ConnectionState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub config: ConnectionConfig,
}

/// One live binding owned by the registry.
#[derive(Debug)]
pub struct RegistryEntry {
    id: ConnectionId,
    adapter: Arc<dyn EngineAdapter>,
    created_at: DateTime<Utc>,
    /// Milliseconds since the Unix epoch
    last_activity: AtomicI64,
    /// Registry-level phase layered over the adapter's own state
    phase: AtomicConnectionState,
}

impl RegistryEntry {
    fn new(id: ConnectionId, adapter: Arc<dyn EngineAdapter>) -> Self {
        let now = Utc::now();
        Self {
            id,
            adapter,
            created_at: now,
            last_activity: AtomicI64::new(now.timestamp_millis()),
            phase: AtomicConnectionState::new(ConnectionState::Connected),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn adapter(&self) -> Arc<dyn EngineAdapter> {
        Arc::clone(&self.adapter)
    }

    /// `Switching` and `Error` set by the registry win over the adapter's state.
    pub fn state(&self) -> ConnectionState {
        match self.phase.get() {
            phase @ (ConnectionState::Switching | ConnectionState::Error) => phase,
            _ => self.adapter.state(),
        }
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_activity.load(Ordering::Acquire))
            .single()
            .unwrap_or(self.created_at)
    }

    fn touch(&self) {
        self.last_activity
            .fetch_max(Utc::now().timestamp_millis(), Ordering::AcqRel);
    }

    /// Idle time as of `now_ms`; never negative.
    fn idle_for(&self, now_ms: i64) -> Duration {
        let idle_ms = now_ms.saturating_sub(self.last_activity.load(Ordering::Acquire));
        Duration::from_millis(u64::try_from(idle_ms).unwrap_or_default())
    }

    /// Records the outcome of a delegated call.
    fn track<T>(&self, result: Result<T>) -> Result<T> {
        self.touch();
        if let Err(e) = &result
            && e.is_connection_error()
        {
            self.phase.set(ConnectionState::Error);
        }
        result
    }

    fn info(&self) -> ConnectionInfo {
        let config = self.adapter.connection_config().clone();
        ConnectionInfo {
            id: self.id,
            engine: self.adapter.engine_type(),
            host: config.host.clone(),
            port: config.effective_port(),
            target: self.adapter.current_target(),
            state: self.state(),
            created_at: self.created_at,
            last_activity: self.last_activity(),
            config,
        }
    }
}

/// Owner of all live connections.
///
/// # Example
///
/// ```rust,no_run
/// use dbbridge_core::registry::ConnectionRegistry;
/// use dbbridge_core::{ConnectionConfig, PageRequest};
///
/// # async fn example() -> dbbridge_core::Result<()> {
/// let registry = ConnectionRegistry::new();
/// let id = registry
///     .create_connection(ConnectionConfig::sqlite(":memory:"), None)
///     .await?;
/// let result = registry.execute_query(id, "SELECT 1", PageRequest::default()).await?;
/// assert_eq!(result.total_queries, 1);
/// registry.close_all_connections().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionId, Arc<RegistryEntry>>>,
    saved: RwLock<HashMap<ConnectionId, ConnectionInfo>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an adapter for `config`, connects it and registers it.
    ///
    /// # Errors
    /// Configuration errors from [`create_adapter`] and connection errors
    /// from the adapter. Nothing is registered on failure.
    pub async fn create_connection(
        &self,
        config: ConnectionConfig,
        credentials: Option<Credentials>,
    ) -> Result<ConnectionId> {
        let adapter = create_adapter(config, credentials)?;
        self.register_adapter(adapter).await
    }

    /// Connects an already-built adapter and registers it under a fresh id.
    pub async fn register_adapter(&self, adapter: Arc<dyn EngineAdapter>) -> Result<ConnectionId> {
        self.register_as(ConnectionId::new(), adapter).await
    }

    async fn register_as(&self, id: ConnectionId, adapter: Arc<dyn EngineAdapter>) -> Result<ConnectionId> {
        if let Err(e) = adapter.connect().await {
            warn!("Connection to {} failed: {}", adapter.engine_type(), e);
            return Err(e);
        }

        let engine = adapter.engine_type();
        let entry = Arc::new(RegistryEntry::new(id, adapter));
        let previous = self.entries.write().await.insert(id, entry);
        if let Some(previous) = previous {
            // Only one adapter may be bound to an id
            if let Err(e) = previous.adapter.disconnect().await {
                warn!("Failed to close replaced connection {}: {}", id, e);
            }
        }

        info!("Registered {} connection {}", engine, id);
        Ok(id)
    }

    async fn entry(&self, id: ConnectionId) -> Result<Arc<RegistryEntry>> {
        self.entries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DbBridgeError::no_active_connection(format!("connection {id} not found")))
    }

    /// Live entry for `id`.
    ///
    /// # Errors
    /// `NoActiveConnection` when the id is unknown or its adapter is not
    /// connected.
    pub async fn get_connection(&self, id: ConnectionId) -> Result<Arc<RegistryEntry>> {
        let entry = self.entry(id).await?;
        match entry.state() {
            ConnectionState::Connected | ConnectionState::Switching => Ok(entry),
            state => Err(DbBridgeError::no_active_connection(format!(
                "connection {id} is {state}"
            ))),
        }
    }

    /// Removes the entry and releases its pool.
    pub async fn close_connection(&self, id: ConnectionId) -> Result<()> {
        let entry = self
            .entries
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| DbBridgeError::no_active_connection(format!("connection {id} not found")))?;

        entry.adapter.disconnect().await?;
        info!("Closed connection {}", id);
        Ok(())
    }

    /// Closes every live connection; failures are logged and skipped.
    pub async fn close_all_connections(&self) {
        let drained: Vec<Arc<RegistryEntry>> =
            self.entries.write().await.drain().map(|(_, entry)| entry).collect();
        let count = drained.len();

        stream::iter(drained)
            .for_each_concurrent(HEALTH_CHECK_CONCURRENCY, |entry| async move {
                if let Err(e) = entry.adapter.disconnect().await {
                    warn!("Failed to close connection {}: {}", entry.id, e);
                }
            })
            .await;

        if count > 0 {
            info!("Closed {} connection(s)", count);
        }
    }

    /// Repoints a connection at another database or schema.
    ///
    /// The entry reports `Switching` meanwhile. A rejected name leaves it
    /// `Connected` on its previous target; a connection failure or timeout
    /// moves it to `Error`.
    pub async fn switch_database(&self, id: ConnectionId, name: &str) -> Result<()> {
        let entry = self.get_connection(id).await?;
        entry.phase.set(ConnectionState::Switching);

        let result = entry.adapter.switch_database(name).await;
        entry.phase.set(match &result {
            Err(e) if e.is_connection_error() => ConnectionState::Error,
            _ => ConnectionState::Connected,
        });
        entry.touch();
        result
    }

    /// Probes every live connection.
    pub async fn health_check(&self) -> Vec<ConnectionHealth> {
        let entries: Vec<Arc<RegistryEntry>> = self.entries.read().await.values().cloned().collect();

        let mut reports: Vec<ConnectionHealth> = stream::iter(entries)
            .map(|entry| async move { probe(&entry).await })
            .buffer_unordered(HEALTH_CHECK_CONCURRENCY)
            .collect()
            .await;
        reports.sort_by_key(|report| report.connection_id);
        reports
    }

    /// Probes one connection.
    pub async fn get_connection_health(&self, id: ConnectionId) -> Result<ConnectionHealth> {
        let entry = self.entry(id).await?;
        Ok(probe(&entry).await)
    }

    /// Closes connections idle for longer than `max_idle` and returns their ids.
    pub async fn cleanup_idle_connections(&self, max_idle: Duration) -> Vec<ConnectionId> {
        let now_ms = Utc::now().timestamp_millis();
        let evicted: Vec<Arc<RegistryEntry>> = {
            let mut entries = self.entries.write().await;
            let idle: Vec<ConnectionId> = entries
                .values()
                .filter(|entry| entry.idle_for(now_ms) > max_idle)
                .map(|entry| entry.id)
                .collect();
            idle.iter().filter_map(|id| entries.remove(id)).collect()
        };

        let mut ids = Vec::with_capacity(evicted.len());
        for entry in evicted {
            info!(
                "Evicting connection {} after {}ms idle",
                entry.id,
                entry.idle_for(now_ms).as_millis()
            );
            if let Err(e) = entry.adapter.disconnect().await {
                warn!("Failed to close idle connection {}: {}", entry.id, e);
            }
            ids.push(entry.id);
        }
        ids
    }

    /// Non-secret descriptors of the live connections, oldest first.
    pub async fn get_all_connections_info(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> =
            self.entries.read().await.values().map(|entry| entry.info()).collect();
        infos.sort_by_key(|info| (info.created_at, info.id));
        infos
    }

    pub async fn connection_count(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Descriptors of live connections followed by saved profiles that are
    /// not live.
    pub async fn save_connections(&self) -> Vec<ConnectionInfo> {
        let mut infos = self.get_all_connections_info().await;
        let saved = self.saved.read().await;
        let mut profiles: Vec<ConnectionInfo> = saved
            .values()
            .filter(|profile| !infos.iter().any(|live| live.id == profile.id))
            .cloned()
            .collect();
        profiles.sort_by_key(|profile| (profile.created_at, profile.id));
        infos.extend(profiles);
        infos
    }

    /// JSON form of [`save_connections`](Self::save_connections).
    pub async fn save_connections_json(&self) -> Result<String> {
        let infos = self.save_connections().await;
        serde_json::to_string_pretty(&infos).map_err(|source| DbBridgeError::Serialization {
            context: "connection descriptors".to_string(),
            source,
        })
    }

    /// Stores descriptors as disconnected saved profiles.
    ///
    /// Ids that are currently live are skipped. Returns the number of
    /// profiles stored.
    pub async fn load_connections(&self, infos: Vec<ConnectionInfo>) -> usize {
        let live = self.entries.read().await;
        let mut saved = self.saved.write().await;
        let mut stored = 0_usize;
        for mut info in infos {
            if live.contains_key(&info.id) {
                debug!("Skipping saved profile {}: already live", info.id);
                continue;
            }
            info.state = ConnectionState::Disconnected;
            saved.insert(info.id, info);
            stored = stored.saturating_add(1);
        }
        stored
    }

    /// Parses and loads the JSON produced by
    /// [`save_connections_json`](Self::save_connections_json).
    pub async fn load_connections_json(&self, json: &str) -> Result<usize> {
        let infos: Vec<ConnectionInfo> =
            serde_json::from_str(json).map_err(|source| DbBridgeError::Serialization {
                context: "connection descriptors".to_string(),
                source,
            })?;
        Ok(self.load_connections(infos).await)
    }

    /// Saved profiles that are not live.
    pub async fn saved_connections(&self) -> Vec<ConnectionInfo> {
        let mut profiles: Vec<ConnectionInfo> = self.saved.read().await.values().cloned().collect();
        profiles.sort_by_key(|profile| (profile.created_at, profile.id));
        profiles
    }

    /// Re-establishes a saved profile under its saved id.
    ///
    /// The profile's last target becomes the initial database.
    pub async fn connect_saved(&self, id: ConnectionId, credentials: Option<Credentials>) -> Result<ConnectionId> {
        let profile = self
            .saved
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DbBridgeError::no_active_connection(format!("no saved profile {id}")))?;

        let mut config = profile.config;
        if config.engine != EngineType::Sqlite && profile.target.is_some() {
            config.database = profile.target;
        }

        let adapter = create_adapter(config, credentials)?;
        self.register_as(id, adapter).await?;
        self.saved.write().await.remove(&id);
        Ok(id)
    }

    pub async fn execute_query(
        &self,
        id: ConnectionId,
        text: &str,
        page: PageRequest,
    ) -> Result<QueryBatchResult> {
        let entry = self.get_connection(id).await?;
        entry.touch();
        entry.track(entry.adapter.execute_query(text, page).await)
    }

    pub async fn get_databases(&self, id: ConnectionId) -> Result<Vec<DatabaseDescriptor>> {
        let entry = self.get_connection(id).await?;
        entry.touch();
        entry.track(entry.adapter.get_databases().await)
    }

    pub async fn get_tables(&self, id: ConnectionId, database: &str) -> Result<Vec<TableDescriptor>> {
        let entry = self.get_connection(id).await?;
        entry.touch();
        entry.track(entry.adapter.get_tables(database).await)
    }

    pub async fn get_table_info(&self, id: ConnectionId, database: &str, table: &str) -> Result<TableInfo> {
        let entry = self.get_connection(id).await?;
        entry.touch();
        entry.track(entry.adapter.get_table_info(database, table).await)
    }

    pub async fn get_multiple_tables_info(
        &self,
        id: ConnectionId,
        database: &str,
        tables: &[String],
    ) -> Result<Vec<TableInfo>> {
        let entry = self.get_connection(id).await?;
        entry.touch();
        entry.track(entry.adapter.get_multiple_tables_info(database, tables).await)
    }
}

/// Round-trips one adapter and records the outcome on its entry.
async fn probe(entry: &RegistryEntry) -> ConnectionHealth {
    let started = Instant::now();
    let healthy = entry.adapter.validate_connection().await;
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if healthy {
        // A passing probe clears a previous connection error
        let _ = entry.phase.transition(ConnectionState::Error, ConnectionState::Connected);
    } else {
        entry.phase.set(ConnectionState::Error);
    }

    ConnectionHealth {
        connection_id: entry.id,
        engine: entry.adapter.engine_type(),
        status: if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        state: entry.state(),
        target: entry.adapter.current_target(),
        latency_ms,
        checked_at: Utc::now(),
    }
}
