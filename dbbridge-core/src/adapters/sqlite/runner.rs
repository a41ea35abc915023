//! Statement execution on one pooled SQLite connection.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};

use crate::Result;
use crate::adapters::helpers::{
    bytes_to_json, count_to_u64, decode_json, float_to_json, sqlx_statement_error,
};
use crate::models::{EngineType, JsonRow, StatementKind};
use crate::query::{
    ExecutionOutcome, IntrospectionCommand, StatementRunner, TableRef, is_insert_statement,
    quote_literal,
};

pub(super) struct SqliteRunner {
    conn: PoolConnection<Sqlite>,
    timeout: Duration,
}

impl SqliteRunner {
    pub(super) fn new(conn: PoolConnection<Sqlite>, timeout: Duration) -> Self {
        Self { conn, timeout }
    }
}

#[async_trait]
impl StatementRunner for SqliteRunner {
    fn engine(&self) -> EngineType {
        EngineType::Sqlite
    }

    fn statement_timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<JsonRow>> {
        let rows = sqlx::Executor::fetch_all(&mut *self.conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| sqlx_statement_error(EngineType::Sqlite, e))?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&mut self, sql: &str, kind: StatementKind) -> Result<ExecutionOutcome> {
        let result = sqlx::Executor::execute(&mut *self.conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| sqlx_statement_error(EngineType::Sqlite, e))?;

        let last_insert_id = (kind == StatementKind::Mutation
            && is_insert_statement(sql)
            && result.rows_affected() > 0)
            .then(|| count_to_u64(result.last_insert_rowid()));

        Ok(ExecutionOutcome {
            rows_affected: Some(result.rows_affected()),
            last_insert_id,
        })
    }

    async fn count(&mut self, sql: &str) -> Result<u64> {
        let row = sqlx::Executor::fetch_one(&mut *self.conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| sqlx_statement_error(EngineType::Sqlite, e))?;
        let total: i64 = row
            .try_get(0)
            .map_err(|e| sqlx_statement_error(EngineType::Sqlite, e))?;
        Ok(count_to_u64(total))
    }

    fn resolve_introspection(&self, command: &IntrospectionCommand) -> Option<String> {
        Some(introspection_sql(command))
    }
}

/// Catalog query answering a `SHOW`/`DESCRIBE` style command.
pub(super) fn introspection_sql(command: &IntrospectionCommand) -> String {
    match command {
        IntrospectionCommand::ShowDatabases => {
            "SELECT name AS \"Database\", file AS \"File\" FROM pragma_database_list ORDER BY seq"
                .to_string()
        }
        IntrospectionCommand::ShowTables => "SELECT name AS \"Tables\" FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            .to_string(),
        IntrospectionCommand::ShowColumns(table) => format!(
            "SELECT name AS \"Field\", type AS \"Type\", \
             CASE WHEN \"notnull\" = 0 THEN 'YES' ELSE 'NO' END AS \"Null\", \
             CASE WHEN pk > 0 THEN 'PRI' ELSE '' END AS \"Key\", \
             dflt_value AS \"Default\" \
             FROM pragma_table_info({}) ORDER BY cid",
            pragma_args(table)
        ),
        IntrospectionCommand::ShowIndexes(table) => format!(
            "SELECT il.name AS \"Key_name\", ii.name AS \"Column_name\", \
             il.\"unique\" AS \"Unique\", il.origin AS \"Origin\" \
             FROM pragma_index_list({}) AS il, pragma_index_info(il.name) AS ii \
             ORDER BY il.seq, ii.seqno",
            pragma_args(table)
        ),
    }
}

fn pragma_args(table: &TableRef) -> String {
    match &table.schema {
        Some(schema) => format!("{}, {}", quote_literal(&table.name), quote_literal(schema)),
        None => quote_literal(&table.name),
    }
}

/// Converts a row to JSON by each value's runtime storage class.
pub fn row_to_json(row: &SqliteRow) -> JsonRow {
    let mut map = JsonRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), column_value(row, idx));
    }
    map
}

fn column_value(row: &SqliteRow, idx: usize) -> JsonValue {
    let storage = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return JsonValue::Null,
        Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
        Err(_) => return JsonValue::Null,
    };

    let decoded = match storage.as_str() {
        "INTEGER" => decode_json!(row, idx, i64, JsonValue::from),
        "REAL" => decode_json!(row, idx, f64, float_to_json),
        "BLOB" => decode_json!(row, idx, Vec<u8>, |v: Vec<u8>| bytes_to_json(&v)),
        _ => decode_json!(row, idx, String, JsonValue::String),
    };

    decoded
        .or_else(|| decode_json!(row, idx, String, JsonValue::String))
        .unwrap_or(JsonValue::Null)
}
