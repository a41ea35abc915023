//! Unit tests for the SQLite adapter against in-memory databases.

use serde_json::json;

use super::runner::introspection_sql;
use super::{MAIN_SCHEMA, SqliteAdapter};
use crate::adapters::{AdapterFeature, ConnectionConfig, EngineAdapter};
use crate::error::DbBridgeError;
use crate::models::{ConnectionState, PageRequest, StatementKind};
use crate::query::{IntrospectionCommand, TableRef};

async fn connected() -> SqliteAdapter {
    let adapter = SqliteAdapter::new(ConnectionConfig::sqlite(":memory:"));
    adapter.connect().await.unwrap();
    adapter
}

#[tokio::test]
async fn test_connect_and_disconnect_in_memory() {
    let adapter = SqliteAdapter::new(ConnectionConfig::sqlite(":memory:"));
    assert_eq!(adapter.state(), ConnectionState::Disconnected);

    adapter.connect().await.unwrap();
    assert_eq!(adapter.state(), ConnectionState::Connected);
    assert!(adapter.validate_connection().await);

    let stats = adapter.connection_stats();
    assert_eq!(stats.max_connections, 1);
    assert_eq!(stats.pool_generation, 1);
    assert_eq!(stats.target.as_deref(), Some(MAIN_SCHEMA));

    adapter.disconnect().await.unwrap();
    assert_eq!(adapter.state(), ConnectionState::Disconnected);
    assert!(!adapter.validate_connection().await);
}

#[tokio::test]
async fn test_connect_twice_keeps_pool() {
    let adapter = connected().await;
    adapter.connect().await.unwrap();
    assert_eq!(adapter.connection_stats().pool_generation, 1);
}

#[tokio::test]
async fn test_missing_file_fails_without_create_flag() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = SqliteAdapter::new(ConnectionConfig::sqlite(dir.path().join("absent.db")));

    let err = adapter.connect().await.unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(adapter.state(), ConnectionState::Error);
}

#[tokio::test]
async fn test_switch_database_is_unsupported() {
    let adapter = connected().await;
    assert!(!adapter.supports_feature(AdapterFeature::SwitchDatabase));

    let err = adapter.switch_database("other").await.unwrap_err();
    assert!(matches!(err, DbBridgeError::UnsupportedOperation { .. }));
    assert_eq!(adapter.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_execute_requires_connection() {
    let adapter = SqliteAdapter::new(ConnectionConfig::sqlite(":memory:"));
    let err = adapter
        .execute_query("SELECT 1", PageRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DbBridgeError::NoActiveConnection { .. }));
}

#[tokio::test]
async fn test_batch_keeps_going_after_failure() {
    let adapter = connected().await;
    let result = adapter
        .execute_query(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, label TEXT); \
             INSERT INTO t (label) VALUES ('a'), ('b'), ('c'); \
             SELCT 1; \
             SELECT id, label FROM t ORDER BY id",
            PageRequest::new(1, 2),
        )
        .await
        .unwrap();

    assert_eq!(result.total_queries, 4);
    let [create, insert, broken, select] = result.queries.as_slice() else {
        panic!("expected four entries");
    };

    assert_eq!(create.kind, StatementKind::Ddl);
    assert!(!create.has_error());

    assert_eq!(insert.kind, StatementKind::Mutation);
    let stats = insert.stats.as_ref().unwrap();
    assert_eq!(stats.affected_rows, Some(3));
    assert_eq!(stats.insert_id, Some(3));

    assert_eq!(broken.kind, StatementKind::Unrecognized);
    assert!(broken.has_error());

    assert_eq!(select.rows.len(), 2);
    assert_eq!(select.total_rows, Some(3));
    let pagination = select.pagination.as_ref().unwrap();
    assert_eq!(pagination.total_pages, 2);
    assert!(pagination.has_more);
    assert_eq!(select.rows[0]["label"], json!("a"));
}

#[tokio::test]
async fn test_row_values_follow_storage_class() {
    let adapter = connected().await;
    let result = adapter
        .execute_query(
            "SELECT 42 AS i, 1.5 AS r, 'x' AS s, x'6869' AS b, NULL AS n LIMIT 1",
            PageRequest::default(),
        )
        .await
        .unwrap();

    let row = &result.queries[0].rows[0];
    assert_eq!(row["i"], json!(42));
    assert_eq!(row["r"], json!(1.5));
    assert_eq!(row["s"], json!("x"));
    assert_eq!(row["b"], json!("base64:aGk="));
    assert_eq!(row["n"], json!(null));
    assert!(result.queries[0].pagination.is_none());
}

#[tokio::test]
async fn test_describe_table_with_keys_indexes_and_triggers() {
    let adapter = connected().await;
    adapter
        .execute_query(
            "CREATE TABLE authors (id INTEGER PRIMARY KEY, name VARCHAR(80) NOT NULL); \
             CREATE TABLE books ( \
                id INTEGER PRIMARY KEY, \
                author_id INTEGER REFERENCES authors ON DELETE CASCADE, \
                title TEXT NOT NULL DEFAULT 'untitled', \
                price DECIMAL(10,2) \
             ); \
             CREATE UNIQUE INDEX idx_books_title ON books (title); \
             CREATE TRIGGER trg_books_ai AFTER INSERT ON books BEGIN SELECT 1; END",
            PageRequest::default(),
        )
        .await
        .unwrap();

    let info = adapter.get_table_info("main", "books").await.unwrap();
    assert_eq!(info.schema.as_deref(), Some("main"));
    assert_eq!(info.columns.len(), 4);

    let id = &info.columns[0];
    assert!(id.is_primary_key);
    assert!(id.is_auto_increment);
    assert!(!id.is_nullable);

    let title = &info.columns[2];
    assert!(!title.is_nullable);
    assert_eq!(title.default_value.as_deref(), Some("'untitled'"));

    let price = &info.columns[3];
    assert_eq!(price.precision, Some(10));
    assert_eq!(price.scale, Some(2));

    assert!(info.indexes.iter().any(|idx| idx.is_primary && idx.columns == ["id"]));
    assert!(
        info.indexes
            .iter()
            .any(|idx| idx.name == "idx_books_title" && idx.is_unique)
    );

    assert_eq!(info.foreign_keys.len(), 1);
    let fk = &info.foreign_keys[0];
    assert_eq!(fk.name, None);
    assert_eq!(fk.referenced_table, "authors");
    assert_eq!(fk.referenced_columns, ["id"]);
    assert_eq!(fk.on_delete.as_deref(), Some("CASCADE"));

    assert_eq!(info.triggers.len(), 1);
    assert_eq!(info.triggers[0].timing.as_deref(), Some("AFTER"));
    assert_eq!(info.triggers[0].event.as_deref(), Some("INSERT"));
    assert_eq!(info.row_count, Some(0));
}

#[tokio::test]
async fn test_describe_unknown_table_fails() {
    let adapter = connected().await;
    let err = adapter.get_table_info("main", "nope").await.unwrap_err();
    assert!(matches!(err, DbBridgeError::IntrospectionPartialFailure { .. }));
}

#[tokio::test]
async fn test_databases_and_tables() {
    let adapter = connected().await;
    adapter
        .execute_query(
            "CREATE TABLE a (x INT); CREATE VIEW v AS SELECT x FROM a",
            PageRequest::default(),
        )
        .await
        .unwrap();

    let databases = adapter.get_databases().await.unwrap();
    let main = databases.iter().find(|d| d.name == "main").unwrap();
    assert!(main.is_current);
    assert_eq!(main.tables, ["a"]);
    assert_eq!(main.views, ["v"]);
    assert!(main.size_bytes.is_some());

    let tables = adapter.get_tables("main").await.unwrap();
    assert_eq!(tables.len(), 2);

    assert!(adapter.get_tables("elsewhere").await.is_err());
}

#[tokio::test]
async fn test_show_commands_are_translated() {
    let adapter = connected().await;
    let result = adapter
        .execute_query(
            "CREATE TABLE people (id INTEGER PRIMARY KEY, nick TEXT); SHOW TABLES; DESCRIBE people",
            PageRequest::default(),
        )
        .await
        .unwrap();

    let tables = &result.queries[1];
    assert_eq!(tables.kind, StatementKind::SchemaIntrospection);
    assert_eq!(tables.rows[0]["Tables"], json!("people"));

    let describe = &result.queries[2];
    assert_eq!(describe.rows.len(), 2);
    assert_eq!(describe.rows[0]["Field"], json!("id"));
    assert_eq!(describe.rows[0]["Key"], json!("PRI"));
}

#[test]
fn test_introspection_sql_uses_schema_argument() {
    let sql = introspection_sql(&IntrospectionCommand::ShowColumns(TableRef::parse("aux.users")));
    assert!(sql.contains("pragma_table_info('users', 'aux')"));
}
