//! SQL Server client configuration and bb8 pool management.

use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use tiberius::{AuthMethod, Config, EncryptionLevel};
use tracing::debug;

use super::{PooledClient, SqlServerAdapter, SqlServerPool, statement_error};
use crate::Result;
use crate::error::DbBridgeError;
use crate::models::EngineType;
use crate::query::quote_ident;

impl SqlServerAdapter {
    /// Translates the connection config into a tiberius client config.
    pub(super) fn client_config(&self) -> Result<Config> {
        let host = self
            .config
            .host
            .as_deref()
            .ok_or_else(|| DbBridgeError::configuration("host is required for sqlserver"))?;
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| DbBridgeError::configuration("credentials are required for sqlserver"))?;

        let mut config = Config::new();
        config.host(host);
        config.port(self.config.effective_port().unwrap_or(1433));
        config.authentication(AuthMethod::sql_server(
            credentials.username(),
            credentials.password(),
        ));

        if let Some(database) = &self.config.database {
            config.database(database);
        }
        if let Some(instance) = &self.config.options.instance_name {
            config.instance_name(instance);
        }
        if let Some(name) = &self.config.options.application_name {
            config.application_name(name);
        }

        match self.config.options.encrypt {
            Some(true) => config.encryption(EncryptionLevel::Required),
            Some(false) => config.encryption(EncryptionLevel::Off),
            None => {}
        }
        if self.config.options.trust_server_certificate {
            config.trust_cert();
        }

        Ok(config)
    }

    /// Builds the pool and proves it with a round-trip.
    pub(super) async fn open_pool(&self) -> Result<SqlServerPool> {
        let manager = ConnectionManager::new(self.client_config()?);
        let min_idle = (self.config.min_connections > 0).then_some(self.config.min_connections);

        let pool = Pool::builder()
            .max_size(self.config.max_connections)
            .min_idle(min_idle)
            .connection_timeout(self.config.connect_timeout)
            .idle_timeout(self.config.idle_timeout)
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| {
                DbBridgeError::connection_failed(
                    format!("Failed to build SQL Server pool for {}", self.config),
                    e,
                )
            })?;

        // bb8 connects lazily; the first checkout surfaces login failures
        let mut conn = pool.get_owned().await.map_err(|e| {
            DbBridgeError::connection_failed(
                format!("Failed to connect to SQL Server at {}", self.config),
                e,
            )
        })?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| DbBridgeError::connection_failed("SQL Server probe query failed", e))?
            .into_results()
            .await
            .map_err(|e| DbBridgeError::connection_failed("SQL Server probe query failed", e))?;
        drop(conn);

        debug!("Opened SQL Server pool for {}", self.config);
        Ok(pool)
    }
}

/// Checks out an owned pooled client.
pub(super) async fn checkout(pool: &SqlServerPool) -> Result<PooledClient> {
    pool.get_owned()
        .await
        .map_err(|e| DbBridgeError::connection_failed("Failed to acquire SQL Server connection", e))
}

/// Points one session at `database`.
pub(super) async fn use_database(conn: &mut PooledClient, database: &str) -> Result<()> {
    let statement = format!("USE {}", quote_ident(EngineType::SqlServer, database));
    conn.simple_query(statement)
        .await
        .map_err(statement_error)?
        .into_results()
        .await
        .map_err(statement_error)?;
    Ok(())
}
