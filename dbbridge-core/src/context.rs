//! Active-context wrapper: one "current" connection for callers that do not
//! track connection ids.
//!
//! The context only remembers which registry id is current. The registry
//! stays the owner of the adapter, so an evicted or closed connection is
//! simply no longer current. Several contexts may share one registry, and
//! tests build an isolated registry per context.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::Result;
use crate::adapters::{ConnectionConfig, EngineAdapter, create_adapter};
use crate::error::DbBridgeError;
use crate::models::{ConnectionId, EngineType, PageRequest, QueryBatchResult};
use crate::registry::{ConnectionRegistry, RegistryEntry};
use crate::security::Credentials;

#[derive(Debug, Clone, Copy)]
struct Current {
    engine: EngineType,
    id: ConnectionId,
}

/// Holds at most one current connection, keyed by engine type.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use dbbridge_core::context::ActiveContext;
/// use dbbridge_core::registry::ConnectionRegistry;
/// use dbbridge_core::{ConnectionConfig, PageRequest};
///
/// # async fn example() -> dbbridge_core::Result<()> {
/// let context = ActiveContext::new(Arc::new(ConnectionRegistry::new()));
/// context.activate(ConnectionConfig::sqlite(":memory:"), None).await?;
/// let result = context.execute_query("SELECT 1", PageRequest::default()).await?;
/// assert_eq!(result.total_queries, 1);
/// context.deactivate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ActiveContext {
    registry: Arc<ConnectionRegistry>,
    /// Held for the whole of an activation so that swaps do not interleave
    current: Mutex<Option<Current>>,
}

impl ActiveContext {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            current: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Makes a connection for `config` current.
    ///
    /// A live current connection with the same engine type and config is
    /// reused. Otherwise the previous connection is closed before the new
    /// adapter is built.
    ///
    /// # Errors
    /// Whatever creating or connecting the new adapter returns. The previous
    /// connection is gone either way.
    pub async fn activate(
        &self,
        config: ConnectionConfig,
        credentials: Option<Credentials>,
    ) -> Result<ConnectionId> {
        let mut current = self.current.lock().await;

        if let Some(active) = *current
            && let Ok(entry) = self.registry.get_connection(active.id).await
            && active.engine == config.engine
            && *entry.adapter().connection_config() == config
        {
            debug!("Reusing current {} connection {}", active.engine, active.id);
            return Ok(active.id);
        }

        self.release(&mut current).await;
        let engine = config.engine;
        let adapter = create_adapter(config, credentials)?;
        let id = self.registry.register_adapter(adapter).await?;
        *current = Some(Current { engine, id });
        info!("Active connection is now {} ({})", id, engine);
        Ok(id)
    }

    /// Makes an already-built adapter current, replacing any previous one.
    pub async fn activate_adapter(&self, adapter: Arc<dyn EngineAdapter>) -> Result<ConnectionId> {
        let mut current = self.current.lock().await;
        self.release(&mut current).await;

        let engine = adapter.engine_type();
        let id = self.registry.register_adapter(adapter).await?;
        *current = Some(Current { engine, id });
        info!("Active connection is now {} ({})", id, engine);
        Ok(id)
    }

    /// Closes the previous current connection, if any.
    async fn release(&self, current: &mut Option<Current>) {
        let Some(previous) = current.take() else {
            return;
        };
        match self.registry.close_connection(previous.id).await {
            Ok(()) => debug!("Released {} connection {}", previous.engine, previous.id),
            // Already evicted or closed through the registry
            Err(DbBridgeError::NoActiveConnection { .. }) => {}
            Err(e) => warn!("Failed to release connection {}: {}", previous.id, e),
        }
    }

    /// The current registry entry.
    ///
    /// # Errors
    /// `NoActiveConnection` when nothing is current or the registry no longer
    /// holds a live connection for it.
    pub async fn current(&self) -> Result<Arc<RegistryEntry>> {
        let id = self
            .current_id()
            .await
            .ok_or_else(|| DbBridgeError::no_active_connection("no active connection"))?;
        self.registry.get_connection(id).await
    }

    pub async fn current_id(&self) -> Option<ConnectionId> {
        self.current.lock().await.map(|active| active.id)
    }

    pub async fn current_engine(&self) -> Option<EngineType> {
        self.current.lock().await.map(|active| active.engine)
    }

    pub async fn execute_query(&self, text: &str, page: PageRequest) -> Result<QueryBatchResult> {
        let entry = self.current().await?;
        self.registry.execute_query(entry.id(), text, page).await
    }

    pub async fn switch_database(&self, name: &str) -> Result<()> {
        let entry = self.current().await?;
        self.registry.switch_database(entry.id(), name).await
    }

    /// Closes the current connection. No-op when nothing is current.
    pub async fn deactivate(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        let Some(previous) = current.take() else {
            return Ok(());
        };
        match self.registry.close_connection(previous.id).await {
            Ok(()) | Err(DbBridgeError::NoActiveConnection { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::adapters::mock::MockAdapter;

    fn context() -> ActiveContext {
        ActiveContext::new(Arc::new(ConnectionRegistry::new()))
    }

    #[tokio::test]
    async fn test_nothing_current_by_default() {
        let context = context();
        assert!(context.current_engine().await.is_none());
        assert!(matches!(
            context.execute_query("SELECT 1", PageRequest::default()).await,
            Err(DbBridgeError::NoActiveConnection { .. })
        ));
        context.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_activation_replaces_previous_engine() {
        let context = context();
        let first = Arc::new(MockAdapter::new(EngineType::MySql));
        let first_dyn: Arc<dyn EngineAdapter> = first.clone();
        let first_id = context.activate_adapter(first_dyn).await.unwrap();

        let second: Arc<dyn EngineAdapter> = Arc::new(MockAdapter::new(EngineType::PostgreSql));
        let second_id = context.activate_adapter(second).await.unwrap();

        assert_ne!(first_id, second_id);
        assert_eq!(first.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(context.current_engine().await, Some(EngineType::PostgreSql));
        assert_eq!(context.registry().connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_activation_leaves_nothing_current() {
        let context = context();
        let ok: Arc<dyn EngineAdapter> = Arc::new(MockAdapter::new(EngineType::MySql));
        context.activate_adapter(ok).await.unwrap();

        let failing: Arc<dyn EngineAdapter> = Arc::new(MockAdapter::failing(EngineType::Oracle));
        assert!(context.activate_adapter(failing).await.is_err());
        assert!(context.current_id().await.is_none());
        assert_eq!(context.registry().connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_execute_and_switch_through_context() {
        let context = context();
        let adapter: Arc<dyn EngineAdapter> = Arc::new(MockAdapter::new(EngineType::SqlServer));
        context.activate_adapter(adapter).await.unwrap();

        let result = context.execute_query("SELECT 1", PageRequest::default()).await.unwrap();
        assert_eq!(result.total_queries, 1);

        context.switch_database("archive").await.unwrap();
        let entry = context.current().await.unwrap();
        assert_eq!(entry.adapter().current_target().as_deref(), Some("archive"));
    }

    #[tokio::test]
    async fn test_evicted_connection_is_no_longer_current() {
        let context = context();
        let adapter: Arc<dyn EngineAdapter> = Arc::new(MockAdapter::new(EngineType::PostgreSql));
        context.activate_adapter(adapter).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        context
            .registry()
            .cleanup_idle_connections(Duration::from_millis(5))
            .await;

        assert!(matches!(
            context.current().await,
            Err(DbBridgeError::NoActiveConnection { .. })
        ));
        context.deactivate().await.unwrap();
        assert!(context.current_id().await.is_none());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_same_config_reuses_connection() {
        let context = context();
        let first = context
            .activate(ConnectionConfig::sqlite(":memory:"), None)
            .await
            .unwrap();
        let again = context
            .activate(ConnectionConfig::sqlite(":memory:"), None)
            .await
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(context.registry().connection_count().await, 1);

        context.deactivate().await.unwrap();
        assert_eq!(context.registry().connection_count().await, 0);
    }
}
