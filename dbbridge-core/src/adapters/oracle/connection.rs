//! Oracle session pool construction and per-checkout session setup.

use std::sync::OnceLock;
use std::time::Duration;

use ::oracle::Connection;
use ::oracle::pool::{Pool, PoolBuilder};
use regex::Regex;
use tracing::debug;

use super::{OracleAdapter, blocking, statement_error};
use crate::Result;
use crate::error::DbBridgeError;
use crate::models::EngineType;
use crate::query::quote_ident;

/// Unquoted Oracle identifier: stored upper-case by the dictionary.
fn plain_identifier() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_$#]*$").expect("plain identifier pattern is valid")
    })
}

/// Dictionary spelling of a schema name.
///
/// Plain identifiers are folded to upper case the way Oracle folds unquoted
/// names; anything else is kept verbatim and later quoted.
///
/// # Example
///
/// ```rust
/// use dbbridge_core::adapters::oracle::canonical_schema;
///
/// assert_eq!(canonical_schema("hr"), "HR");
/// assert_eq!(canonical_schema("Mixed Case"), "Mixed Case");
/// ```
pub fn canonical_schema(name: &str) -> String {
    if plain_identifier().is_match(name) {
        name.to_ascii_uppercase()
    } else {
        name.to_string()
    }
}

/// `ALTER SESSION` statement pointing a session at `schema`.
pub(super) fn set_schema_statement(schema: &str) -> String {
    let ident = if plain_identifier().is_match(schema) {
        schema.to_string()
    } else {
        quote_ident(EngineType::Oracle, schema)
    };
    format!("ALTER SESSION SET CURRENT_SCHEMA = {ident}")
}

impl OracleAdapter {
    /// Easy-connect string `//host:port/service`.
    pub(super) fn connect_string(&self) -> Result<String> {
        let host = self
            .config
            .host
            .as_deref()
            .ok_or_else(|| DbBridgeError::configuration("host is required for oracle"))?;
        let service = self
            .config
            .options
            .service_name
            .as_deref()
            .ok_or_else(|| DbBridgeError::configuration("service_name is required for oracle"))?;
        let port = self.config.effective_port().unwrap_or(1521);
        Ok(format!("//{host}:{port}/{service}"))
    }

    /// Builds the session pool and proves it with a ping.
    pub(super) async fn open_pool(&self) -> Result<Pool> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| DbBridgeError::configuration("credentials are required for oracle"))?;
        let connect_string = self.connect_string()?;
        let username = credentials.username().to_string();
        let password = credentials.password().to_string();
        let min = self.config.min_connections;
        let max = self.config.max_connections;
        let target = self.state.target();
        let call_timeout = self.config.query_timeout;
        let display_target = self.config.to_string();

        blocking(move || {
            let pool = PoolBuilder::new(username, password, connect_string)
                .min_connections(min)
                .max_connections(max)
                .build()
                .map_err(|e| {
                    DbBridgeError::connection_failed(format!("Failed to connect to Oracle at {display_target}"), e)
                })?;

            let conn = checkout(&pool, target.as_deref(), call_timeout)?;
            conn.ping()
                .map_err(|e| DbBridgeError::connection_failed("Oracle probe ping failed", e))?;
            drop(conn);

            debug!("Opened Oracle session pool for {}", display_target);
            Ok(pool)
        })
        .await
    }
}

/// Gets a pooled session set up for one operation.
///
/// Autocommit is switched on, the call timeout bounds every round-trip and
/// the session is pointed at `schema` when one is given.
pub(super) fn checkout(pool: &Pool, schema: Option<&str>, call_timeout: Duration) -> Result<Connection> {
    let mut conn = pool
        .get()
        .map_err(|e| DbBridgeError::connection_failed("Failed to acquire Oracle session", e))?;
    conn.set_autocommit(true);
    conn.set_call_timeout(Some(call_timeout))
        .map_err(|e| DbBridgeError::connection_failed("Failed to set Oracle call timeout", e))?;

    if let Some(schema) = schema {
        conn.execute(&set_schema_statement(schema), &[])
            .map_err(statement_error)?;
    }
    Ok(conn)
}

/// `(open, busy)` session counts; zero when the pool cannot answer.
pub(super) fn pool_counts(pool: &Pool) -> (u32, u32) {
    (
        pool.open_count().unwrap_or_default(),
        pool.busy_count().unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_schema_folds_plain_names() {
        assert_eq!(canonical_schema("hr"), "HR");
        assert_eq!(canonical_schema("App_Data$1"), "APP_DATA$1");
        assert_eq!(canonical_schema("sales-eu"), "sales-eu");
        assert_eq!(canonical_schema("1abc"), "1abc");
    }

    #[test]
    fn test_set_schema_statement_quotes_only_when_needed() {
        assert_eq!(
            set_schema_statement("HR"),
            "ALTER SESSION SET CURRENT_SCHEMA = HR"
        );
        assert_eq!(
            set_schema_statement("sales-eu"),
            "ALTER SESSION SET CURRENT_SCHEMA = \"sales-eu\""
        );
    }
}
