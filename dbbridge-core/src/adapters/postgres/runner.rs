//! Statement execution on one pooled PostgreSQL connection.
//!
//! User statements use the simple query protocol (`raw_sql`), so values
//! arrive in text format; types without a typed decoder fall back to that
//! text as-is.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgRow, Postgres};
use sqlx::types::{BigDecimal, Uuid};
use sqlx::{Column, Row, TypeInfo};

use crate::Result;
use crate::adapters::helpers::{
    bytes_to_json, count_to_u64, decode_json, float_to_json, sqlx_statement_error,
};
use crate::models::{EngineType, JsonRow, StatementKind};
use crate::query::{
    ExecutionOutcome, IntrospectionCommand, StatementRunner, TableRef, quote_literal,
};

pub(super) struct PostgresRunner {
    conn: PoolConnection<Postgres>,
    timeout: Duration,
}

impl PostgresRunner {
    pub(super) fn new(conn: PoolConnection<Postgres>, timeout: Duration) -> Self {
        Self { conn, timeout }
    }
}

#[async_trait]
impl StatementRunner for PostgresRunner {
    fn engine(&self) -> EngineType {
        EngineType::PostgreSql
    }

    fn statement_timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<JsonRow>> {
        let rows = sqlx::Executor::fetch_all(&mut *self.conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| sqlx_statement_error(EngineType::PostgreSql, e))?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&mut self, sql: &str, _kind: StatementKind) -> Result<ExecutionOutcome> {
        let result = sqlx::Executor::execute(&mut *self.conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| sqlx_statement_error(EngineType::PostgreSql, e))?;

        // PostgreSQL has no session-wide last insert id; RETURNING covers it
        Ok(ExecutionOutcome {
            rows_affected: Some(result.rows_affected()),
            last_insert_id: None,
        })
    }

    async fn count(&mut self, sql: &str) -> Result<u64> {
        let row = sqlx::Executor::fetch_one(&mut *self.conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| sqlx_statement_error(EngineType::PostgreSql, e))?;
        let total: i64 = row
            .try_get(0)
            .map_err(|e| sqlx_statement_error(EngineType::PostgreSql, e))?;
        Ok(count_to_u64(total))
    }

    fn resolve_introspection(&self, command: &IntrospectionCommand) -> Option<String> {
        Some(introspection_sql(command))
    }
}

/// Catalog query answering a `SHOW`/`DESCRIBE` style command.
pub(super) fn introspection_sql(command: &IntrospectionCommand) -> String {
    match command {
        IntrospectionCommand::ShowDatabases => "SELECT datname AS \"Database\" FROM pg_database \
             WHERE NOT datistemplate ORDER BY datname"
            .to_string(),
        IntrospectionCommand::ShowTables => "SELECT table_name AS \"Tables\", table_schema AS \"Schema\" \
             FROM information_schema.tables \
             WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
             ORDER BY table_schema, table_name"
            .to_string(),
        IntrospectionCommand::ShowColumns(table) => format!(
            "SELECT column_name AS \"Field\", data_type AS \"Type\", is_nullable AS \"Null\", \
             column_default AS \"Default\" \
             FROM information_schema.columns \
             WHERE table_name = {} AND {} \
             ORDER BY ordinal_position",
            quote_literal(&table.name),
            schema_filter("table_schema", table)
        ),
        IntrospectionCommand::ShowIndexes(table) => format!(
            "SELECT indexname AS \"Key_name\", indexdef AS \"Definition\" \
             FROM pg_indexes \
             WHERE tablename = {} AND {} \
             ORDER BY indexname",
            quote_literal(&table.name),
            schema_filter("schemaname", table)
        ),
    }
}

/// An explicit schema, else whatever the search path resolves.
fn schema_filter(column: &str, table: &TableRef) -> String {
    match &table.schema {
        Some(schema) => format!("{column} = {}", quote_literal(schema)),
        None => format!("{column} = ANY(current_schemas(false))"),
    }
}

/// Converts a row to JSON by each column's type.
pub fn row_to_json(row: &PgRow) -> JsonRow {
    let mut map = JsonRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_ascii_uppercase();
        map.insert(column.name().to_string(), column_value(row, idx, &type_name));
    }
    map
}

fn column_value(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
    let decoded = match type_name {
        "BOOL" => decode_json!(row, idx, bool, JsonValue::Bool),
        "INT2" => decode_json!(row, idx, i16, JsonValue::from),
        "INT4" => decode_json!(row, idx, i32, JsonValue::from),
        "INT8" => decode_json!(row, idx, i64, JsonValue::from),
        "OID" => decode_json!(row, idx, sqlx::postgres::types::Oid, |v: sqlx::postgres::types::Oid| {
            JsonValue::from(v.0)
        }),
        "FLOAT4" => decode_json!(row, idx, f32, |v: f32| float_to_json(f64::from(v))),
        "FLOAT8" => decode_json!(row, idx, f64, float_to_json),
        "NUMERIC" => decode_json!(row, idx, BigDecimal, |v: BigDecimal| JsonValue::String(
            v.to_string()
        )),
        "UUID" => decode_json!(row, idx, Uuid, |v: Uuid| JsonValue::String(v.to_string())),
        "JSON" | "JSONB" => decode_json!(row, idx, JsonValue, |v: JsonValue| v),
        "DATE" => decode_json!(row, idx, NaiveDate, |v: NaiveDate| JsonValue::String(
            v.to_string()
        )),
        "TIME" => decode_json!(row, idx, NaiveTime, |v: NaiveTime| JsonValue::String(
            v.to_string()
        )),
        "TIMESTAMP" => decode_json!(row, idx, NaiveDateTime, |v: NaiveDateTime| {
            JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        "TIMESTAMPTZ" => decode_json!(row, idx, DateTime<Utc>, |v: DateTime<Utc>| {
            JsonValue::String(v.to_rfc3339())
        }),
        "BYTEA" => decode_json!(row, idx, Vec<u8>, |v: Vec<u8>| bytes_to_json(&v)),
        _ => decode_json!(row, idx, String, JsonValue::String),
    };

    decoded
        .or_else(|| text_fallback(row, idx))
        .unwrap_or(JsonValue::Null)
}

/// Text-format values (arrays, intervals, enums, ...) as the server rendered them.
fn text_fallback(row: &PgRow, idx: usize) -> Option<JsonValue> {
    match row.try_get_unchecked::<Option<String>, _>(idx) {
        Ok(Some(text)) => Some(JsonValue::String(text)),
        Ok(None) => Some(JsonValue::Null),
        Err(_) => None,
    }
}
