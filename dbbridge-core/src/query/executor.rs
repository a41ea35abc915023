//! Engine-agnostic execution of a multi-statement request.
//!
//! Adapters check out one native session and wrap it in a [`StatementRunner`];
//! [`run_batch`] then drives splitting, classification, pagination, the count
//! query and message capture. Statements run strictly in order and a failing
//! statement never stops the ones after it.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::{IntrospectionCommand, classify, count_query, has_limiting_clause, paginate, split_statements};
use crate::Result;
use crate::error::DbBridgeError;
use crate::models::{
    EngineType, JsonRow, PageRequest, Pagination, QueryBatchResult, QueryMessage,
    QueryResultEntry, QueryStats, StatementKind,
};

/// Effects reported by the engine for a non-read statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub rows_affected: Option<u64>,
    pub last_insert_id: Option<u64>,
}

/// One checked-out session able to run statements.
///
/// Errors returned from these methods are already classified
/// (`SqlSyntax` / `SqlExecution`).
#[async_trait]
pub trait StatementRunner: Send {
    fn engine(&self) -> EngineType;

    /// Per-statement time bound.
    fn statement_timeout(&self) -> Duration;

    /// Runs a statement and returns its rows.
    async fn fetch_rows(&mut self, sql: &str) -> Result<Vec<JsonRow>>;

    /// Runs a statement for its side effects.
    async fn execute(&mut self, sql: &str, kind: StatementKind) -> Result<ExecutionOutcome>;

    /// Runs a `SELECT COUNT(*)` statement and returns the count.
    async fn count(&mut self, sql: &str) -> Result<u64>;

    /// Catalog query answering an introspection command; `None` runs the
    /// statement text unchanged.
    fn resolve_introspection(&self, command: &IntrospectionCommand) -> Option<String>;
}

/// Bounds a future with a timeout, mapping expiry to [`DbBridgeError::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| DbBridgeError::timeout(operation, limit))?
}

/// Executes every statement of `text` on `runner`.
pub async fn run_batch<R>(runner: &mut R, text: &str, page: PageRequest) -> QueryBatchResult
where
    R: StatementRunner + ?Sized,
{
    let statements = split_statements(text);
    let mut queries = Vec::with_capacity(statements.len());

    for statement in &statements {
        queries.push(run_statement(runner, statement, page).await);
    }

    QueryBatchResult {
        total_queries: queries.len(),
        queries,
        executed_at: Utc::now(),
    }
}

async fn run_statement<R>(runner: &mut R, statement: &str, page: PageRequest) -> QueryResultEntry
where
    R: StatementRunner + ?Sized,
{
    let kind = classify(statement);
    let started = Instant::now();
    let mut entry = QueryResultEntry::new(statement, kind);

    let outcome = match kind {
        StatementKind::Select => run_read(runner, statement, page, &mut entry).await,
        StatementKind::SchemaIntrospection => run_introspection(runner, statement, &mut entry).await,
        _ => run_execute(runner, statement, kind, &mut entry).await,
    };

    if let Err(error) = outcome {
        warn!(
            engine = %runner.engine(),
            kind = ?kind,
            "Statement failed: {}",
            error
        );
        entry.messages.push(QueryMessage::error(error.to_string()));
    }

    entry.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    entry
}

async fn run_read<R>(
    runner: &mut R,
    statement: &str,
    page: PageRequest,
    entry: &mut QueryResultEntry,
) -> Result<()>
where
    R: StatementRunner + ?Sized,
{
    let engine = runner.engine();
    let limit = runner.statement_timeout();

    if has_limiting_clause(statement) {
        let rows = with_timeout("statement", limit, runner.fetch_rows(statement)).await?;
        entry.total_rows = Some(rows.len() as u64);
        entry.messages.push(rows_returned(rows.len()));
        entry.rows = rows;
        return Ok(());
    }

    let paged = paginate(statement, engine, page);
    let rows = with_timeout("statement", limit, runner.fetch_rows(&paged)).await?;
    let counted = with_timeout("count query", limit, runner.count(&count_query(statement, engine))).await;

    match counted {
        Ok(total) => {
            entry.total_rows = Some(total);
            entry.pagination = Some(Pagination::compute(total, page));
        }
        Err(error) => {
            debug!("Count query failed, pagination disabled: {}", error);
            entry.total_rows = Some(rows.len() as u64);
            entry.messages.push(QueryMessage::warning(format!(
                "Total row count unavailable, pagination disabled: {error}"
            )));
        }
    }

    entry.messages.push(rows_returned(rows.len()));
    entry.rows = rows;
    Ok(())
}

async fn run_introspection<R>(runner: &mut R, statement: &str, entry: &mut QueryResultEntry) -> Result<()>
where
    R: StatementRunner + ?Sized,
{
    let sql = IntrospectionCommand::parse(statement)
        .and_then(|command| runner.resolve_introspection(&command))
        .unwrap_or_else(|| statement.to_string());

    let limit = runner.statement_timeout();
    let rows = with_timeout("statement", limit, runner.fetch_rows(&sql)).await?;
    entry.total_rows = Some(rows.len() as u64);
    entry.messages.push(rows_returned(rows.len()));
    entry.rows = rows;
    Ok(())
}

async fn run_execute<R>(
    runner: &mut R,
    statement: &str,
    kind: StatementKind,
    entry: &mut QueryResultEntry,
) -> Result<()>
where
    R: StatementRunner + ?Sized,
{
    let limit = runner.statement_timeout();
    let outcome = with_timeout("statement", limit, runner.execute(statement, kind)).await?;

    let text = match (kind, outcome.rows_affected) {
        (StatementKind::Mutation, Some(n)) => format!("{n} row(s) affected"),
        _ => "Statement executed successfully".to_string(),
    };
    entry.messages.push(QueryMessage::info(text));
    entry.stats = Some(QueryStats {
        affected_rows: outcome.rows_affected,
        insert_id: outcome.last_insert_id,
    });
    Ok(())
}

fn rows_returned(count: usize) -> QueryMessage {
    QueryMessage::info(format!("{count} row(s) returned"))
}
