//! MySQL connect options and pool management.
//!
//! # Session Settings
//! Every new pooled connection runs with `time_zone = '+00:00'` so temporal
//! values render the same regardless of server defaults.

use sqlx::MySqlPool;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::pool::PoolConnection;

use super::MySqlAdapter;
use crate::Result;
use crate::adapters::helpers::sqlx_statement_error;
use crate::error::DbBridgeError;
use crate::models::EngineType;
use crate::query::quote_ident;

impl MySqlAdapter {
    pub(super) fn connect_options(&self) -> Result<MySqlConnectOptions> {
        let host = self
            .config
            .host
            .as_deref()
            .ok_or_else(|| DbBridgeError::configuration("host is required for mysql"))?;

        let mut options = MySqlConnectOptions::new()
            .host(host)
            .port(self.config.effective_port().unwrap_or(3306));

        if let Some(credentials) = &self.credentials {
            options = options.username(credentials.username());
            if credentials.has_password() {
                options = options.password(credentials.password());
            }
        }

        if let Some(database) = &self.config.database {
            options = options.database(database);
        }

        if let Some(charset) = &self.config.options.charset {
            options = options.charset(charset);
        }

        if let Some(mode) = &self.config.options.ssl_mode {
            options = options.ssl_mode(parse_ssl_mode(mode)?);
        }

        Ok(options)
    }

    /// Builds the pool and proves it with a round-trip.
    pub(super) async fn open_pool(&self) -> Result<MySqlPool> {
        use sqlx::Executor;

        let options = self.connect_options()?;

        let pool = MySqlPoolOptions::new()
            .max_connections(self.config.max_connections)
            .min_connections(self.config.min_connections)
            .acquire_timeout(self.config.connect_timeout)
            .idle_timeout(self.config.idle_timeout)
            .test_before_acquire(true)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    conn.execute("SET time_zone = '+00:00'").await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| {
                DbBridgeError::connection_failed(
                    format!("Failed to connect to MySQL at {}", self.config),
                    e,
                )
            })?;

        Ok(pool)
    }

    /// Checks out a pooled connection.
    pub(super) async fn checkout(&self, pool: &MySqlPool) -> Result<PoolConnection<MySql>> {
        pool.acquire()
            .await
            .map_err(|e| DbBridgeError::connection_failed("Failed to acquire MySQL connection", e))
    }
}

/// Points one session at `database`.
pub(super) async fn use_database(conn: &mut PoolConnection<MySql>, database: &str) -> Result<()> {
    let statement = format!("USE {}", quote_ident(EngineType::MySql, database));
    sqlx::Executor::execute(&mut **conn, sqlx::raw_sql(&statement))
        .await
        .map_err(|e| sqlx_statement_error(EngineType::MySql, e))?;
    Ok(())
}

/// Accepts libpq-style names (`prefer`, `verify-full`) as well as MySQL's own.
fn parse_ssl_mode(mode: &str) -> Result<MySqlSslMode> {
    match mode.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "disable" | "disabled" => Ok(MySqlSslMode::Disabled),
        "prefer" | "preferred" => Ok(MySqlSslMode::Preferred),
        "require" | "required" => Ok(MySqlSslMode::Required),
        "verify_ca" => Ok(MySqlSslMode::VerifyCa),
        "verify_full" | "verify_identity" => Ok(MySqlSslMode::VerifyIdentity),
        other => Err(DbBridgeError::configuration(format!(
            "Unknown MySQL ssl_mode: {other}"
        ))),
    }
}
