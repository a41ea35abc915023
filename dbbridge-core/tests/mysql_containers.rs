//! MySQL adapter tests against a throwaway server container.
//!
//! These tests need a Docker daemon and are ignored by default:
//! `cargo test --test mysql_containers -- --ignored`

#![cfg(feature = "mysql")]

use std::time::Duration;

use dbbridge_core::{
    ConnectionConfig, ConnectionState, Credentials, EngineAdapter, EngineType, PageRequest,
    Result, StatementKind, adapters::mysql::MySqlAdapter,
};
use serde_json::json;
use sqlx::MySqlPool;
use testcontainers_modules::{mysql::Mysql, testcontainers::runners::AsyncRunner};

/// Polls until the server accepts queries.
async fn wait_for_mysql_ready(port: u16, max_attempts: u32) {
    let url = format!("mysql://root@127.0.0.1:{port}/test");
    for _ in 0..max_attempts {
        if let Ok(pool) = MySqlPool::connect(&url).await {
            if sqlx::query("SELECT 1").fetch_one(&pool).await.is_ok() {
                pool.close().await;
                return;
            }
            pool.close().await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("MySQL failed to become ready after {max_attempts} attempts");
}

fn config(port: u16) -> ConnectionConfig {
    ConnectionConfig::new(EngineType::MySql, "127.0.0.1")
        .with_port(port)
        .with_database("test")
}

fn credentials() -> Option<Credentials> {
    Some(Credentials::new("root", None))
}

// ============================================================================
// Query execution
// ============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_batch_with_insert_id_and_paging() -> Result<()> {
    let container = Mysql::default().start().await.unwrap();
    let port = container.get_host_port_ipv4(3306).await.unwrap();
    wait_for_mysql_ready(port, 60).await;

    let adapter = MySqlAdapter::new(config(port), credentials());
    adapter.connect().await?;
    assert_eq!(adapter.state(), ConnectionState::Connected);

    let result = adapter
        .execute_query(
            "CREATE TABLE orders (id INT AUTO_INCREMENT PRIMARY KEY, sku VARCHAR(20) NOT NULL); \
             INSERT INTO orders (sku) VALUES ('a'), ('b'), ('c'), ('d'), ('e'); \
             SELECT id, sku FROM orders ORDER BY id",
            PageRequest::new(1, 2),
        )
        .await?;

    let [create, insert, select] = result.queries.as_slice() else {
        panic!("expected three entries");
    };
    assert_eq!(create.kind, StatementKind::Ddl);
    assert_eq!(insert.stats.unwrap().affected_rows, Some(5));
    assert_eq!(insert.stats.unwrap().insert_id, Some(1));

    assert_eq!(select.rows.len(), 2);
    assert_eq!(select.total_rows, Some(5));
    assert_eq!(select.rows[1]["sku"], json!("b"));
    assert_eq!(select.pagination.unwrap().total_pages, 3);

    let info = adapter.get_table_info("test", "orders").await?;
    assert!(info.columns[0].is_auto_increment);
    assert_eq!(info.columns[1].max_length, Some(20));
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_show_commands_pass_through() -> Result<()> {
    let container = Mysql::default().start().await.unwrap();
    let port = container.get_host_port_ipv4(3306).await.unwrap();
    wait_for_mysql_ready(port, 60).await;

    let adapter = MySqlAdapter::new(config(port), credentials());
    adapter.connect().await?;

    let result = adapter
        .execute_query(
            "CREATE TABLE t (x INT); SHOW TABLES; SHOW DATABASES",
            PageRequest::default(),
        )
        .await?;
    assert_eq!(result.queries[1].kind, StatementKind::SchemaIntrospection);
    assert_eq!(result.queries[1].rows.len(), 1);
    assert!(result.queries[1].pagination.is_none());
    assert!(!result.queries[2].rows.is_empty());
    Ok(())
}

// ============================================================================
// Database switching
// ============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_switch_keeps_pool_and_moves_every_checkout() -> Result<()> {
    let container = Mysql::default().start().await.unwrap();
    let port = container.get_host_port_ipv4(3306).await.unwrap();
    wait_for_mysql_ready(port, 60).await;

    let adapter = MySqlAdapter::new(config(port), credentials());
    adapter.connect().await?;
    adapter
        .execute_query("CREATE DATABASE shop", PageRequest::default())
        .await?;

    adapter.switch_database("shop").await?;
    assert_eq!(adapter.current_target().as_deref(), Some("shop"));
    assert_eq!(adapter.connection_stats().pool_generation, 1);

    for _ in 0..3 {
        let result = adapter
            .execute_query("SELECT DATABASE() AS db", PageRequest::default())
            .await?;
        assert_eq!(result.queries[0].rows[0]["db"], json!("shop"));
    }

    assert!(adapter.switch_database("nowhere").await.is_err());
    assert_eq!(adapter.current_target().as_deref(), Some("shop"));
    assert_eq!(adapter.state(), ConnectionState::Connected);
    Ok(())
}
