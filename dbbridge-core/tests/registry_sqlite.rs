//! Connection registry tests backed by real SQLite connections.
//!
//! This test suite covers:
//! - Creating, using and closing registered connections
//! - Saving descriptors and reconnecting saved profiles
//! - Idle eviction and health probes

#![cfg(feature = "sqlite")]

use std::time::Duration;

use dbbridge_core::{
    ConnectionConfig, ConnectionId, ConnectionRegistry, ConnectionState, EngineAdapter,
    EngineOptions, EngineType, HealthStatus, PageRequest, Result, error::DbBridgeError,
};
use serde_json::json;

fn file_config(dir: &tempfile::TempDir, name: &str) -> ConnectionConfig {
    ConnectionConfig::sqlite(dir.path().join(name))
        .with_options(EngineOptions::default().with_create_if_missing(true))
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_create_query_and_close() -> Result<()> {
    let registry = ConnectionRegistry::new();
    let id = registry
        .create_connection(ConnectionConfig::sqlite(":memory:"), None)
        .await?;
    assert_eq!(registry.connection_count().await, 1);

    let result = registry
        .execute_query(
            id,
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT); \
             INSERT INTO notes (body) VALUES ('hello'); \
             SELECT body FROM notes",
            PageRequest::default(),
        )
        .await?;
    assert_eq!(result.total_queries, 3);
    assert_eq!(result.queries[2].rows[0]["body"], json!("hello"));

    let info = registry.get_table_info(id, "main", "notes").await?;
    assert_eq!(info.columns.len(), 2);
    assert!(info.columns[0].is_primary_key);

    let databases = registry.get_databases(id).await?;
    assert!(databases.iter().any(|db| db.name == "main" && db.tables == ["notes"]));

    registry.close_connection(id).await?;
    assert_eq!(registry.connection_count().await, 0);
    assert!(matches!(
        registry.execute_query(id, "SELECT 1", PageRequest::default()).await,
        Err(DbBridgeError::NoActiveConnection { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_failed_connect_registers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConnectionConfig::sqlite(dir.path().join("absent.db"));

    let registry = ConnectionRegistry::new();
    let err = registry.create_connection(config, None).await.unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(registry.connection_count().await, 0);
}

#[tokio::test]
async fn test_switch_is_unsupported_and_keeps_connection() -> Result<()> {
    let registry = ConnectionRegistry::new();
    let id = registry
        .create_connection(ConnectionConfig::sqlite(":memory:"), None)
        .await?;

    let err = registry.switch_database(id, "other").await.unwrap_err();
    assert!(matches!(err, DbBridgeError::UnsupportedOperation { .. }));

    let entry = registry.get_connection(id).await?;
    assert_eq!(entry.state(), ConnectionState::Connected);
    assert_eq!(entry.adapter().current_target().as_deref(), Some("main"));
    Ok(())
}

#[tokio::test]
async fn test_connections_are_isolated() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let registry = ConnectionRegistry::new();
    let left = registry.create_connection(file_config(&dir, "left.db"), None).await?;
    let right = registry.create_connection(file_config(&dir, "right.db"), None).await?;

    registry
        .execute_query(left, "CREATE TABLE only_left (x INT)", PageRequest::default())
        .await?;

    assert_eq!(registry.get_tables(left, "main").await?.len(), 1);
    assert!(registry.get_tables(right, "main").await?.is_empty());

    registry.close_all_connections().await;
    assert_eq!(registry.connection_count().await, 0);
    Ok(())
}

// ============================================================================
// Saved profiles
// ============================================================================

#[tokio::test]
async fn test_saved_profile_reconnects_under_same_id() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let original = ConnectionRegistry::new();
    let id = original
        .create_connection(file_config(&dir, "saved.db"), None)
        .await?;
    original
        .execute_query(
            id,
            "CREATE TABLE kept (v TEXT); INSERT INTO kept VALUES ('still here')",
            PageRequest::default(),
        )
        .await?;

    let json = original.save_connections_json().await?;
    assert!(json.contains("\"engine\""));
    original.close_all_connections().await;

    let restored = ConnectionRegistry::new();
    assert_eq!(restored.load_connections_json(&json).await?, 1);
    let saved = restored.saved_connections().await;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].id, id);
    assert_eq!(saved[0].engine, EngineType::Sqlite);
    assert_eq!(saved[0].state, ConnectionState::Disconnected);
    assert_eq!(restored.connection_count().await, 0);

    let reconnected = restored.connect_saved(id, None).await?;
    assert_eq!(reconnected, id);
    assert!(restored.saved_connections().await.is_empty());

    let result = restored
        .execute_query(id, "SELECT v FROM kept", PageRequest::default())
        .await?;
    assert_eq!(result.queries[0].rows[0]["v"], json!("still here"));

    restored.close_all_connections().await;
    Ok(())
}

#[tokio::test]
async fn test_loading_skips_live_ids() -> Result<()> {
    let registry = ConnectionRegistry::new();
    let id = registry
        .create_connection(ConnectionConfig::sqlite(":memory:"), None)
        .await?;

    let infos = registry.save_connections().await;
    assert_eq!(infos.len(), 1);
    assert_eq!(registry.load_connections(infos).await, 0);
    assert!(registry.saved_connections().await.is_empty());

    assert!(matches!(
        registry.connect_saved(ConnectionId::new(), None).await,
        Err(DbBridgeError::NoActiveConnection { .. })
    ));
    registry.close_connection(id).await
}

#[tokio::test]
async fn test_malformed_descriptor_json_is_rejected() {
    let registry = ConnectionRegistry::new();
    let err = registry.load_connections_json("{not json").await.unwrap_err();
    assert!(matches!(err, DbBridgeError::Serialization { .. }));
}

// ============================================================================
// Maintenance
// ============================================================================

#[tokio::test]
async fn test_idle_connections_are_evicted() -> Result<()> {
    let registry = ConnectionRegistry::new();
    let stale = registry
        .create_connection(ConnectionConfig::sqlite(":memory:"), None)
        .await?;

    tokio::time::sleep(Duration::from_millis(150)).await;
    let fresh = registry
        .create_connection(ConnectionConfig::sqlite(":memory:"), None)
        .await?;

    let evicted = registry
        .cleanup_idle_connections(Duration::from_millis(100))
        .await;
    assert_eq!(evicted, vec![stale]);
    assert_eq!(registry.connection_count().await, 1);
    assert!(registry.get_connection(fresh).await.is_ok());
    assert!(registry.get_connection(stale).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_health_reports_every_connection() -> Result<()> {
    let registry = ConnectionRegistry::new();
    let first = registry
        .create_connection(ConnectionConfig::sqlite(":memory:"), None)
        .await?;
    let second = registry
        .create_connection(ConnectionConfig::sqlite(":memory:"), None)
        .await?;

    let reports = registry.health_check().await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.status == HealthStatus::Healthy));
    assert!(reports.iter().all(|r| r.engine == EngineType::Sqlite));

    let single = registry.get_connection_health(second).await?;
    assert_eq!(single.connection_id, second);
    assert_eq!(single.state, ConnectionState::Connected);

    let infos = registry.get_all_connections_info().await;
    assert_eq!(infos.len(), 2);
    assert!(infos.iter().any(|info| info.id == first));
    assert!(infos.iter().all(|info| info.target.as_deref() == Some("main")));
    Ok(())
}
