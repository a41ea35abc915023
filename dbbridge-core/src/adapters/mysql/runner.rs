//! Statement execution on one pooled MySQL connection.
//!
//! User statements go through the text protocol (`raw_sql`), which accepts
//! every statement MySQL does, including ones the prepared protocol rejects.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySql, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::types::BigDecimal;
use sqlx::{Column, Row, TypeInfo};

use crate::Result;
use crate::adapters::helpers::{
    bytes_to_json, count_to_u64, decode_json, float_to_json, sqlx_statement_error,
};
use crate::models::{EngineType, JsonRow, StatementKind};
use crate::query::{ExecutionOutcome, IntrospectionCommand, StatementRunner, is_insert_statement};

pub(super) struct MySqlRunner {
    conn: PoolConnection<MySql>,
    timeout: Duration,
}

impl MySqlRunner {
    pub(super) fn new(conn: PoolConnection<MySql>, timeout: Duration) -> Self {
        Self { conn, timeout }
    }
}

#[async_trait]
impl StatementRunner for MySqlRunner {
    fn engine(&self) -> EngineType {
        EngineType::MySql
    }

    fn statement_timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<JsonRow>> {
        let rows = sqlx::Executor::fetch_all(&mut *self.conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| sqlx_statement_error(EngineType::MySql, e))?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&mut self, sql: &str, kind: StatementKind) -> Result<ExecutionOutcome> {
        let result = sqlx::Executor::execute(&mut *self.conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| sqlx_statement_error(EngineType::MySql, e))?;

        let last_insert_id = (kind == StatementKind::Mutation
            && is_insert_statement(sql)
            && result.last_insert_id() > 0)
            .then(|| result.last_insert_id());

        Ok(ExecutionOutcome {
            rows_affected: Some(result.rows_affected()),
            last_insert_id,
        })
    }

    async fn count(&mut self, sql: &str) -> Result<u64> {
        let row = sqlx::Executor::fetch_one(&mut *self.conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| sqlx_statement_error(EngineType::MySql, e))?;
        let total: i64 = row
            .try_get(0)
            .map_err(|e| sqlx_statement_error(EngineType::MySql, e))?;
        Ok(count_to_u64(total))
    }

    /// MySQL understands every `SHOW`/`DESCRIBE` form natively.
    fn resolve_introspection(&self, _command: &IntrospectionCommand) -> Option<String> {
        None
    }
}

/// Converts a row to JSON by each column's declared type.
pub fn row_to_json(row: &MySqlRow) -> JsonRow {
    let mut map = JsonRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_ascii_uppercase();
        map.insert(column.name().to_string(), column_value(row, idx, &type_name));
    }
    map
}

fn column_value(row: &MySqlRow, idx: usize, type_name: &str) -> JsonValue {
    let decoded = match type_name {
        "BOOLEAN" => decode_json!(row, idx, bool, JsonValue::Bool),
        t if t.ends_with("UNSIGNED") => decode_json!(row, idx, u64, JsonValue::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            decode_json!(row, idx, i64, JsonValue::from)
        }
        "FLOAT" => decode_json!(row, idx, f32, |v: f32| float_to_json(f64::from(v))),
        "DOUBLE" => decode_json!(row, idx, f64, float_to_json),
        "DECIMAL" => decode_json!(row, idx, BigDecimal, |v: BigDecimal| JsonValue::String(
            v.to_string()
        )),
        "DATE" => decode_json!(row, idx, NaiveDate, |v: NaiveDate| JsonValue::String(
            v.to_string()
        )),
        "TIME" => decode_json!(row, idx, NaiveTime, |v: NaiveTime| JsonValue::String(
            v.to_string()
        )),
        "DATETIME" => decode_json!(row, idx, NaiveDateTime, |v: NaiveDateTime| {
            JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        "TIMESTAMP" => decode_json!(row, idx, DateTime<Utc>, |v: DateTime<Utc>| {
            JsonValue::String(v.to_rfc3339())
        }),
        "JSON" => decode_json!(row, idx, JsonValue, |v: JsonValue| v),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "GEOMETRY"
        | "BIT" => decode_json!(row, idx, Vec<u8>, |v: Vec<u8>| bytes_to_json(&v)),
        _ => decode_json!(row, idx, String, JsonValue::String),
    };

    decoded
        .or_else(|| decode_json!(row, idx, String, JsonValue::String))
        .or_else(|| text_fallback(row, idx))
        .unwrap_or(JsonValue::Null)
}

/// Text-protocol values are UTF-8 renderings; zero dates and `YEAR` land here.
fn text_fallback(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
    match row.try_get_unchecked::<Option<String>, _>(idx) {
        Ok(Some(text)) => Some(JsonValue::String(text)),
        Ok(None) => Some(JsonValue::Null),
        Err(_) => None,
    }
}
