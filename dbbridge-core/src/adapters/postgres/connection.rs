//! PostgreSQL connect options and pool construction.
//!
//! # Session Settings
//! Applied to every new pooled connection:
//! - `statement_timeout` mirrors the configured query timeout
//! - `timezone = 'UTC'` for consistent timestamp rendering

use std::str::FromStr;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use tracing::debug;

use super::PostgresAdapter;
use crate::Result;
use crate::error::DbBridgeError;
use crate::query::with_timeout;

/// A pool for catalog reads: the adapter's own, or a short-lived one for
/// another database on the same server.
pub(super) struct CatalogPool {
    pool: PgPool,
    temporary: bool,
}

impl CatalogPool {
    pub(super) fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Closes the pool if it was opened only for this request.
    pub(super) async fn release(self) {
        if self.temporary {
            self.pool.close().await;
        }
    }
}

impl PostgresAdapter {
    pub(super) fn connect_options(&self, database: &str) -> Result<PgConnectOptions> {
        let host = self
            .config
            .host
            .as_deref()
            .ok_or_else(|| DbBridgeError::configuration("host is required for postgresql"))?;

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(self.config.effective_port().unwrap_or(5432))
            .database(database);

        if let Some(credentials) = &self.credentials {
            options = options.username(credentials.username());
            if credentials.has_password() {
                options = options.password(credentials.password());
            }
        }

        if let Some(mode) = &self.config.options.ssl_mode {
            let mode = PgSslMode::from_str(mode).map_err(|_| {
                DbBridgeError::configuration(format!("Unknown PostgreSQL ssl_mode: {mode}"))
            })?;
            options = options.ssl_mode(mode);
        }

        let application_name = self
            .config
            .options
            .application_name
            .clone()
            .unwrap_or_else(|| format!("dbbridge-{}", env!("CARGO_PKG_VERSION")));
        options = options.application_name(&application_name);

        Ok(options)
    }

    /// Builds a pool bound to `database` and proves it with a round-trip.
    pub(super) async fn open_pool(&self, database: &str, max_connections: u32) -> Result<PgPool> {
        use sqlx::Executor;

        let options = self.connect_options(database)?;
        let statement_timeout_ms = self.config.query_timeout.as_millis();

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(self.config.min_connections.min(max_connections))
            .acquire_timeout(self.config.connect_timeout)
            .idle_timeout(self.config.idle_timeout)
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(format!("SET statement_timeout = {statement_timeout_ms}").as_str())
                        .await?;
                    conn.execute("SET timezone = 'UTC'").await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await
            .map_err(|e| {
                DbBridgeError::connection_failed(
                    format!(
                        "Failed to connect to PostgreSQL database '{database}' at {}",
                        self.config
                    ),
                    e,
                )
            })?;

        debug!("Opened PostgreSQL pool for database '{}'", database);
        Ok(pool)
    }

    /// Pool for reading `database`'s catalog.
    ///
    /// The current database reuses the adapter's pool; any other one gets a
    /// single-connection pool that the caller releases afterwards.
    pub(super) async fn catalog_pool(&self, database: &str) -> Result<CatalogPool> {
        let (pool, current) = self.pool_with_database().await?;
        if database.is_empty() || database == current {
            return Ok(CatalogPool {
                pool,
                temporary: false,
            });
        }

        let pool = with_timeout(
            "open catalog connection",
            self.config.connect_timeout,
            self.open_pool(database, 1),
        )
        .await?;
        Ok(CatalogPool {
            pool,
            temporary: true,
        })
    }
}
