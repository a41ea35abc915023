//! Statement execution on one pooled Oracle session.
//!
//! Sessions start in autocommit mode. `BEGIN`/`START TRANSACTION` turn it off
//! until the next `COMMIT` or `ROLLBACK`, which map to the driver's own
//! commit and rollback calls. A transaction still open when the session goes
//! back to the pool is rolled back by ODPI-C.

use std::time::Duration;

use ::oracle::sql_type::{FromSql, OracleType};
use ::oracle::{Connection, ResultSet, Row};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde_json::Value as JsonValue;

use super::{canonical_schema, statement_error};
use crate::Result;
use crate::adapters::helpers::{bytes_to_json, count_to_u64, float_to_json};
use crate::error::DbBridgeError;
use crate::models::{EngineType, JsonRow, StatementKind};
use crate::query::{
    ExecutionOutcome, IntrospectionCommand, StatementRunner, TableRef, quote_literal,
    strip_leading_comments,
};

/// What a transaction-control statement means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionAction {
    Begin,
    Commit,
    Rollback,
    /// Savepoints and anything else the server handles itself
    Passthrough,
}

fn transaction_action(sql: &str) -> TransactionAction {
    let words: Vec<String> = strip_leading_comments(sql)
        .split_whitespace()
        .take(2)
        .map(str::to_ascii_uppercase)
        .collect();
    match words.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["BEGIN"] | ["BEGIN", "TRANSACTION" | "WORK"] | ["START", "TRANSACTION"] => {
            TransactionAction::Begin
        }
        ["COMMIT"] | ["COMMIT", "WORK"] | ["END"] => TransactionAction::Commit,
        ["ROLLBACK"] | ["ROLLBACK", "WORK"] => TransactionAction::Rollback,
        _ => TransactionAction::Passthrough,
    }
}

pub(super) struct OracleRunner {
    /// Taken while a driver call runs on the blocking pool
    conn: Option<Connection>,
    timeout: Duration,
}

impl OracleRunner {
    pub(super) fn new(conn: Connection, timeout: Duration) -> Self {
        Self {
            conn: Some(conn),
            timeout,
        }
    }

    /// Moves the session into a blocking worker and takes it back afterwards.
    ///
    /// A statement abandoned by its timeout keeps the session, so later
    /// statements in the same batch fail instead of racing it.
    async fn on_session<T, F>(&mut self, work: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut conn = self.conn.take().ok_or_else(|| {
            DbBridgeError::no_active_connection("Oracle session was abandoned by a timed-out statement")
        })?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = work(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| DbBridgeError::connection_failed("Oracle worker task failed", e))?;
        self.conn = Some(conn);
        result
    }
}

#[async_trait]
impl StatementRunner for OracleRunner {
    fn engine(&self) -> EngineType {
        EngineType::Oracle
    }

    fn statement_timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<JsonRow>> {
        let sql = sql.to_string();
        self.on_session(move |conn| {
            let rows = conn.query(&sql, &[]).map_err(statement_error)?;
            collect_rows(rows)
        })
        .await
    }

    async fn execute(&mut self, sql: &str, kind: StatementKind) -> Result<ExecutionOutcome> {
        let sql = sql.to_string();
        self.on_session(move |conn| {
            if kind == StatementKind::TransactionControl {
                match transaction_action(&sql) {
                    TransactionAction::Begin => {
                        conn.set_autocommit(false);
                        return Ok(ExecutionOutcome::default());
                    }
                    TransactionAction::Commit => {
                        conn.commit().map_err(statement_error)?;
                        conn.set_autocommit(true);
                        return Ok(ExecutionOutcome::default());
                    }
                    TransactionAction::Rollback => {
                        conn.rollback().map_err(statement_error)?;
                        conn.set_autocommit(true);
                        return Ok(ExecutionOutcome::default());
                    }
                    TransactionAction::Passthrough => {}
                }
            }

            let statement = conn.execute(&sql, &[]).map_err(statement_error)?;
            let rows_affected = match kind {
                StatementKind::Mutation => Some(statement.row_count().map_err(statement_error)?),
                _ => None,
            };
            Ok(ExecutionOutcome {
                rows_affected,
                last_insert_id: None,
            })
        })
        .await
    }

    async fn count(&mut self, sql: &str) -> Result<u64> {
        let sql = sql.to_string();
        self.on_session(move |conn| {
            let total = conn
                .query_row_as::<i64>(&sql, &[])
                .map_err(statement_error)?;
            Ok(count_to_u64(total))
        })
        .await
    }

    fn resolve_introspection(&self, command: &IntrospectionCommand) -> Option<String> {
        Some(introspection_sql(command))
    }
}

/// Dictionary query answering a `SHOW`/`DESCRIBE` style command.
pub(super) fn introspection_sql(command: &IntrospectionCommand) -> String {
    match command {
        IntrospectionCommand::ShowDatabases => {
            "SELECT username AS \"Database\" FROM all_users ORDER BY username".to_string()
        }
        IntrospectionCommand::ShowTables => "SELECT object_name AS \"Tables\", object_type AS \"Type\" \
             FROM all_objects \
             WHERE owner = SYS_CONTEXT('USERENV', 'CURRENT_SCHEMA') \
               AND object_type IN ('TABLE', 'VIEW') \
             ORDER BY object_name"
            .to_string(),
        IntrospectionCommand::ShowColumns(table) => format!(
            "SELECT column_name AS \"Field\", data_type AS \"Type\", nullable AS \"Null\", \
             data_default AS \"Default\" \
             FROM all_tab_columns \
             WHERE table_name = {} AND owner = {} \
             ORDER BY column_id",
            quote_literal(&table.name),
            owner_expr(table)
        ),
        IntrospectionCommand::ShowIndexes(table) => format!(
            "SELECT ic.index_name AS \"Key_name\", ic.column_name AS \"Column_name\", \
             ic.column_position AS \"Seq_in_index\", \
             CASE WHEN i.uniqueness = 'UNIQUE' THEN 0 ELSE 1 END AS \"Non_unique\", \
             i.index_type AS \"Index_type\" \
             FROM all_ind_columns ic \
             JOIN all_indexes i ON i.owner = ic.index_owner AND i.index_name = ic.index_name \
             WHERE ic.table_name = {} AND ic.table_owner = {} \
             ORDER BY ic.index_name, ic.column_position",
            quote_literal(&table.name),
            owner_expr(table)
        ),
    }
}

/// An explicit schema, else the session's current schema.
fn owner_expr(table: &TableRef) -> String {
    table.schema.as_deref().map_or_else(
        || "SYS_CONTEXT('USERENV', 'CURRENT_SCHEMA')".to_string(),
        |schema| quote_literal(&canonical_schema(schema)),
    )
}

fn collect_rows(rows: ResultSet<'_, Row>) -> Result<Vec<JsonRow>> {
    let columns: Vec<(String, OracleType)> = rows
        .column_info()
        .iter()
        .map(|info| (info.name().to_string(), info.oracle_type().clone()))
        .collect();

    let mut out = Vec::new();
    for row in rows {
        let row = row.map_err(statement_error)?;
        out.push(row_to_json(&row, &columns));
    }
    Ok(out)
}

/// Converts a row to JSON by each column's declared Oracle type.
pub fn row_to_json(row: &Row, columns: &[(String, OracleType)]) -> JsonRow {
    let mut map = JsonRow::new();
    for (idx, (name, oracle_type)) in columns.iter().enumerate() {
        map.insert(name.clone(), cell_value(row, idx, oracle_type));
    }
    map
}

fn cell_value(row: &Row, idx: usize, oracle_type: &OracleType) -> JsonValue {
    let typed = match oracle_type {
        // NUMBER(p, 0) up to 18 digits fits an i64; wider or scaled numbers stay exact text
        OracleType::Number(precision, 0) if (1..=18).contains(precision) => {
            decode::<i64, _>(row, idx, JsonValue::from)
        }
        OracleType::Int64 => decode::<i64, _>(row, idx, JsonValue::from),
        OracleType::BinaryFloat | OracleType::BinaryDouble => decode::<f64, _>(row, idx, float_to_json),
        OracleType::Boolean => decode::<bool, _>(row, idx, JsonValue::Bool),
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => {
            decode::<Vec<u8>, _>(row, idx, |bytes| bytes_to_json(&bytes))
        }
        OracleType::Date | OracleType::Timestamp(_) | OracleType::TimestampLTZ(_) => {
            decode::<NaiveDateTime, _>(row, idx, |v| {
                JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            })
        }
        OracleType::TimestampTZ(_) => {
            decode::<DateTime<FixedOffset>, _>(row, idx, |v| JsonValue::String(v.to_rfc3339()))
        }
        _ => None,
    };

    typed
        .or_else(|| decode::<String, _>(row, idx, JsonValue::String))
        .unwrap_or(JsonValue::Null)
}

/// `None` when the driver cannot convert the value to `T`.
fn decode<T, F>(row: &Row, idx: usize, map: F) -> Option<JsonValue>
where
    T: FromSql,
    F: FnOnce(T) -> JsonValue,
{
    match row.get::<_, Option<T>>(idx) {
        Ok(Some(value)) => Some(map(value)),
        Ok(None) => Some(JsonValue::Null),
        Err(_) => None,
    }
}
