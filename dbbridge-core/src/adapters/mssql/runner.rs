//! Statement execution on one pooled SQL Server client.
//!
//! Reads, DDL and transaction control go out as plain batches
//! (`simple_query`) so session state such as an open transaction survives
//! between statements. Mutations use `execute`, the only call that reports
//! affected row counts, except inserts: those run in one batch with a trailing
//! `SELECT` of `@@ROWCOUNT` and `SCOPE_IDENTITY()`, which only sees the
//! identity generated inside the same batch.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use tiberius::{ColumnData, Row};

use super::{PooledClient, statement_error};
use crate::Result;
use crate::adapters::helpers::{bytes_to_json, count_to_u64, float_to_json, format_scaled_decimal};
use crate::error::DbBridgeError;
use crate::models::{EngineType, JsonRow, StatementKind};
use crate::query::{
    ExecutionOutcome, IntrospectionCommand, StatementRunner, TableRef, is_insert_statement,
    quote_literal,
};

pub(super) struct SqlServerRunner {
    conn: PooledClient,
    timeout: Duration,
}

impl SqlServerRunner {
    pub(super) fn new(conn: PooledClient, timeout: Duration) -> Self {
        Self { conn, timeout }
    }
}

#[async_trait]
impl StatementRunner for SqlServerRunner {
    fn engine(&self) -> EngineType {
        EngineType::SqlServer
    }

    fn statement_timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<JsonRow>> {
        let rows = self
            .conn
            .simple_query(sql)
            .await
            .map_err(statement_error)?
            .into_first_result()
            .await
            .map_err(statement_error)?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&mut self, sql: &str, kind: StatementKind) -> Result<ExecutionOutcome> {
        if kind == StatementKind::Mutation && is_insert_statement(sql) {
            return self.execute_insert(sql).await;
        }
        if kind == StatementKind::Mutation {
            let result = self.conn.execute(sql, &[]).await.map_err(statement_error)?;
            return Ok(ExecutionOutcome {
                rows_affected: Some(result.total()),
                last_insert_id: None,
            });
        }

        self.conn
            .simple_query(sql)
            .await
            .map_err(statement_error)?
            .into_results()
            .await
            .map_err(statement_error)?;
        Ok(ExecutionOutcome::default())
    }

    async fn count(&mut self, sql: &str) -> Result<u64> {
        let rows = self
            .conn
            .simple_query(sql)
            .await
            .map_err(statement_error)?
            .into_first_result()
            .await
            .map_err(statement_error)?;

        count_from_cell(rows.first().and_then(|row| row.cells().next()).map(|(_, data)| data))
    }

    fn resolve_introspection(&self, command: &IntrospectionCommand) -> Option<String> {
        Some(introspection_sql(command))
    }
}

impl SqlServerRunner {
    async fn execute_insert(&mut self, sql: &str) -> Result<ExecutionOutcome> {
        let results = self
            .conn
            .simple_query(insert_with_identity_sql(sql))
            .await
            .map_err(statement_error)?
            .into_results()
            .await
            .map_err(statement_error)?;

        let mut cells = results
            .last()
            .and_then(|rows| rows.first())
            .map(|row| row.cells().map(|(_, data)| integer_cell(data)).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter();
        let rows_affected = cells.next().flatten().map(count_to_u64);
        let last_insert_id = cells
            .next()
            .flatten()
            .and_then(|id| u64::try_from(id).ok())
            .filter(|id| *id > 0);

        Ok(ExecutionOutcome {
            rows_affected,
            last_insert_id,
        })
    }
}

/// An insert batch that also reports its row count and generated identity.
pub(super) fn insert_with_identity_sql(sql: &str) -> String {
    format!(
        "{sql}\n;SELECT CAST(@@ROWCOUNT AS BIGINT) AS affected_rows, \
         CAST(SCOPE_IDENTITY() AS BIGINT) AS insert_id"
    )
}

/// Integer value of a cell, `None` for NULL or any other type.
pub(super) fn integer_cell(data: &ColumnData<'_>) -> Option<i64> {
    match data {
        ColumnData::U8(value) => value.map(i64::from),
        ColumnData::I16(value) => value.map(i64::from),
        ColumnData::I32(value) => value.map(i64::from),
        ColumnData::I64(value) => *value,
        _ => None,
    }
}

/// Row total from the first cell of a count query.
pub(super) fn count_from_cell(cell: Option<&ColumnData<'_>>) -> Result<u64> {
    cell.and_then(integer_cell)
        .map(count_to_u64)
        .ok_or_else(|| DbBridgeError::query_failed("count query returned no integer value"))
}

/// Catalog query answering a `SHOW`/`DESCRIBE` style command.
pub(super) fn introspection_sql(command: &IntrospectionCommand) -> String {
    match command {
        IntrospectionCommand::ShowDatabases => {
            "SELECT name AS [Database] FROM sys.databases ORDER BY name".to_string()
        }
        IntrospectionCommand::ShowTables => "SELECT TABLE_NAME AS [Tables], TABLE_SCHEMA AS [Schema], \
             TABLE_TYPE AS [Type] \
             FROM INFORMATION_SCHEMA.TABLES \
             ORDER BY TABLE_SCHEMA, TABLE_NAME"
            .to_string(),
        IntrospectionCommand::ShowColumns(table) => format!(
            "SELECT COLUMN_NAME AS [Field], DATA_TYPE AS [Type], IS_NULLABLE AS [Null], \
             COLUMN_DEFAULT AS [Default] \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_NAME = {} AND TABLE_SCHEMA = {} \
             ORDER BY ORDINAL_POSITION",
            quote_literal(&table.name),
            schema_expr(table)
        ),
        IntrospectionCommand::ShowIndexes(table) => format!(
            "SELECT i.name AS [Key_name], c.name AS [Column_name], \
             CAST(ic.key_ordinal AS int) AS [Seq_in_index], \
             CAST(CASE WHEN i.is_unique = 1 THEN 0 ELSE 1 END AS int) AS [Non_unique], \
             i.type_desc AS [Index_type] \
             FROM sys.indexes i \
             JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
             JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
             JOIN sys.objects o ON o.object_id = i.object_id \
             WHERE o.name = {} AND SCHEMA_NAME(o.schema_id) = {} AND i.name IS NOT NULL \
             ORDER BY i.name, ic.key_ordinal",
            quote_literal(&table.name),
            schema_expr(table)
        ),
    }
}

/// An explicit schema, else the session's default schema.
fn schema_expr(table: &TableRef) -> String {
    table
        .schema
        .as_deref()
        .map_or_else(|| "SCHEMA_NAME()".to_string(), quote_literal)
}

/// Converts a row to JSON by each cell's wire type.
pub fn row_to_json(row: &Row) -> JsonRow {
    let mut map = JsonRow::new();
    for (idx, (column, data)) in row.cells().enumerate() {
        map.insert(column.name().to_string(), cell_value(row, idx, data));
    }
    map
}

fn cell_value(row: &Row, idx: usize, data: &ColumnData<'static>) -> JsonValue {
    match data {
        ColumnData::Bit(Some(b)) => JsonValue::Bool(*b),
        ColumnData::U8(Some(v)) => JsonValue::from(*v),
        ColumnData::I16(Some(v)) => JsonValue::from(*v),
        ColumnData::I32(Some(v)) => JsonValue::from(*v),
        ColumnData::I64(Some(v)) => JsonValue::from(*v),
        ColumnData::F32(Some(v)) => float_to_json(f64::from(*v)),
        ColumnData::F64(Some(v)) => float_to_json(*v),
        ColumnData::Numeric(Some(n)) => JsonValue::String(format_scaled_decimal(n.value(), n.scale())),
        ColumnData::String(Some(s)) => JsonValue::String(s.to_string()),
        ColumnData::Guid(Some(g)) => JsonValue::String(g.to_string()),
        ColumnData::Binary(Some(b)) => bytes_to_json(b),
        ColumnData::Xml(Some(xml)) => JsonValue::String(xml.to_string()),
        ColumnData::DateTime(Some(_))
        | ColumnData::SmallDateTime(Some(_))
        | ColumnData::DateTime2(Some(_)) => temporal(row, idx, |v: NaiveDateTime| {
            v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
        }),
        ColumnData::DateTimeOffset(Some(_)) => temporal(row, idx, |v: DateTime<Utc>| v.to_rfc3339()),
        ColumnData::Date(Some(_)) => temporal(row, idx, |v: NaiveDate| v.to_string()),
        ColumnData::Time(Some(_)) => temporal(row, idx, |v: NaiveTime| v.to_string()),
        _ => JsonValue::Null,
    }
}

/// Decodes a temporal cell through tiberius' chrono conversions.
fn temporal<'a, T, F>(row: &'a Row, idx: usize, render: F) -> JsonValue
where
    T: tiberius::FromSql<'a>,
    F: FnOnce(T) -> String,
{
    match row.try_get::<T, _>(idx) {
        Ok(Some(value)) => JsonValue::String(render(value)),
        _ => JsonValue::Null,
    }
}
