//! SQLite adapter tests against database files on disk.
//!
//! This test suite covers:
//! - File creation and persistence across reconnects
//! - Paged reads and their page bookkeeping
//! - Per-statement results in mixed batches
//! - Introspection addressed by file stem
//! - Isolation between adapters on different files

#![cfg(feature = "sqlite")]

use std::path::Path;

use dbbridge_core::{
    ConnectionConfig, ConnectionState, EngineAdapter, EngineOptions, PageRequest, Result,
    StatementKind, TableKind, adapters::sqlite::SqliteAdapter, error::DbBridgeError,
};
use serde_json::json;
use tempfile::TempDir;

fn file_config(path: &Path) -> ConnectionConfig {
    ConnectionConfig::sqlite(path)
        .with_options(EngineOptions::default().with_create_if_missing(true))
}

async fn connected_file(dir: &TempDir, name: &str) -> Result<SqliteAdapter> {
    let adapter = SqliteAdapter::new(file_config(&dir.path().join(name)));
    adapter.connect().await?;
    Ok(adapter)
}

async fn seed_items(adapter: &SqliteAdapter, count: u32) -> Result<()> {
    let values = (1..=count)
        .map(|i| format!("('item-{i}', {i})"))
        .collect::<Vec<_>>()
        .join(", ");
    let batch = format!(
        "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL, qty INTEGER); \
         INSERT INTO items (label, qty) VALUES {values}"
    );
    let result = adapter.execute_query(&batch, PageRequest::default()).await?;
    assert!(result.queries.iter().all(|q| !q.has_error()));
    Ok(())
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_file_is_created_when_requested() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("created.db");
    assert!(!path.exists());

    let adapter = SqliteAdapter::new(file_config(&path));
    adapter.connect().await?;
    assert_eq!(adapter.state(), ConnectionState::Connected);
    assert!(path.exists());

    adapter.disconnect().await?;
    assert_eq!(adapter.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_data_survives_reconnect() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let adapter = connected_file(&dir, "persist.db").await?;
    seed_items(&adapter, 3).await?;

    adapter.disconnect().await?;
    adapter.connect().await?;
    assert_eq!(adapter.connection_stats().pool_generation, 2);

    let result = adapter
        .execute_query("SELECT COUNT(*) AS n FROM items", PageRequest::default())
        .await?;
    assert_eq!(result.queries[0].rows[0]["n"], json!(3));
    Ok(())
}

#[tokio::test]
async fn test_adapters_on_different_files_do_not_interfere() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let first = connected_file(&dir, "first.db").await?;
    let second = connected_file(&dir, "second.db").await?;
    seed_items(&first, 2).await?;

    let result = second
        .execute_query("SELECT * FROM items", PageRequest::default())
        .await?;
    assert!(result.queries[0].has_error());
    assert!(second.get_tables("main").await?.is_empty());

    second.disconnect().await?;
    assert_eq!(first.state(), ConnectionState::Connected);
    assert_eq!(first.get_tables("main").await?.len(), 1);
    Ok(())
}

// ============================================================================
// Query execution
// ============================================================================

#[tokio::test]
async fn test_paged_reads() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let adapter = connected_file(&dir, "paging.db").await?;
    seed_items(&adapter, 5).await?;

    let sql = "SELECT id, label FROM items ORDER BY id";
    let second_page = adapter.execute_query(sql, PageRequest::new(2, 2)).await?;
    let entry = &second_page.queries[0];
    assert_eq!(entry.kind, StatementKind::Select);
    assert_eq!(entry.total_rows, Some(5));
    assert_eq!(entry.rows.len(), 2);
    assert_eq!(entry.rows[0]["id"], json!(3));
    assert_eq!(entry.messages[0].text, "2 row(s) returned");

    let pagination = entry.pagination.expect("paged read carries pagination");
    assert_eq!(pagination.page, 2);
    assert_eq!(pagination.total_pages, 3);
    assert!(pagination.has_more);

    let last_page = adapter.execute_query(sql, PageRequest::new(3, 2)).await?;
    let entry = &last_page.queries[0];
    assert_eq!(entry.rows.len(), 1);
    assert!(!entry.pagination.expect("paged read carries pagination").has_more);

    // Reading a page twice gives the same rows
    let again = adapter.execute_query(sql, PageRequest::new(2, 2)).await?;
    assert_eq!(again.queries[0].rows, second_page.queries[0].rows);
    Ok(())
}

#[tokio::test]
async fn test_explicit_limit_disables_paging() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let adapter = connected_file(&dir, "limit.db").await?;
    seed_items(&adapter, 5).await?;

    let result = adapter
        .execute_query(
            "SELECT id FROM items ORDER BY id LIMIT 4",
            PageRequest::new(1, 2),
        )
        .await?;
    let entry = &result.queries[0];
    assert_eq!(entry.rows.len(), 4);
    assert_eq!(entry.total_rows, Some(4));
    assert!(entry.pagination.is_none());
    Ok(())
}

#[tokio::test]
async fn test_mixed_batch_reports_each_statement() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let adapter = connected_file(&dir, "batch.db").await?;
    seed_items(&adapter, 4).await?;

    let result = adapter
        .execute_query(
            "UPDATE items SET qty = qty * 10 WHERE id <= 2; \
             DELETE FROM missing_table; \
             CREATE INDEX idx_items_qty ON items (qty); \
             SELECT SUM(qty) AS total FROM items",
            PageRequest::default(),
        )
        .await?;
    assert_eq!(result.total_queries, 4);

    let update = &result.queries[0];
    assert_eq!(update.kind, StatementKind::Mutation);
    assert_eq!(update.messages[0].text, "2 row(s) affected");

    let delete = &result.queries[1];
    assert!(delete.has_error());

    let ddl = &result.queries[2];
    assert_eq!(ddl.kind, StatementKind::Ddl);
    assert_eq!(ddl.messages[0].text, "Statement executed successfully");

    assert_eq!(result.queries[3].rows[0]["total"], json!(10 + 20 + 3 + 4));
    Ok(())
}

#[tokio::test]
async fn test_rolled_back_transaction_leaves_no_rows() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let adapter = connected_file(&dir, "tx.db").await?;
    seed_items(&adapter, 1).await?;

    let result = adapter
        .execute_query(
            "BEGIN; INSERT INTO items (label, qty) VALUES ('temp', 0); ROLLBACK",
            PageRequest::default(),
        )
        .await?;
    assert_eq!(result.queries[0].kind, StatementKind::TransactionControl);
    assert!(result.queries.iter().all(|q| !q.has_error()));

    let count = adapter
        .execute_query("SELECT COUNT(*) AS n FROM items", PageRequest::default())
        .await?;
    assert_eq!(count.queries[0].rows[0]["n"], json!(1));
    Ok(())
}

#[tokio::test]
async fn test_binary_values_are_base64() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let adapter = connected_file(&dir, "blob.db").await?;

    let result = adapter
        .execute_query(
            "CREATE TABLE blobs (payload BLOB); \
             INSERT INTO blobs VALUES (x'00ff10'); \
             SELECT payload FROM blobs",
            PageRequest::default(),
        )
        .await?;
    assert_eq!(result.queries[2].rows[0]["payload"], json!("base64:AP8Q"));
    Ok(())
}

// ============================================================================
// Introspection
// ============================================================================

#[tokio::test]
async fn test_file_stem_names_the_main_database() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let adapter = connected_file(&dir, "inventory.db").await?;
    seed_items(&adapter, 2).await?;

    let info = adapter.get_table_info("inventory", "items").await?;
    assert_eq!(info.name, "items");
    assert_eq!(info.columns.len(), 3);
    assert_eq!(info.row_count, Some(2));
    assert!(info.error.is_none());

    let tables = adapter.get_tables("inventory").await?;
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].kind, TableKind::Table);

    let err = adapter.get_tables("warehouse").await.unwrap_err();
    assert!(matches!(err, DbBridgeError::IntrospectionPartialFailure { .. }));
    Ok(())
}

#[tokio::test]
async fn test_multiple_table_info_keeps_failures_in_place() -> Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let adapter = connected_file(&dir, "multi.db").await?;
    seed_items(&adapter, 1).await?;

    let infos = adapter
        .get_multiple_tables_info("main", &["items".to_string(), "ghost".to_string()])
        .await?;
    assert_eq!(infos.len(), 2);
    assert!(infos[0].error.is_none());
    assert_eq!(infos[1].name, "ghost");
    assert!(infos[1].error.is_some());
    Ok(())
}
