//! Engine-specific connection tuning.
//!
//! Every field is optional; each adapter reads the subset that applies to it
//! and ignores the rest.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-engine connection knobs.
///
/// # Example
/// ```rust
/// use dbbridge_core::adapters::EngineOptions;
///
/// let options = EngineOptions::default()
///     .with_charset("utf8mb4")
///     .with_ssl_mode("prefer");
/// assert_eq!(options.charset.as_deref(), Some("utf8mb4"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Connection character set (MySQL)
    pub charset: Option<String>,
    /// TLS mode understood by the driver: `disable`, `prefer`, `require`, ... (MySQL, PostgreSQL)
    pub ssl_mode: Option<String>,
    /// Whether to negotiate TLS (SQL Server)
    pub encrypt: Option<bool>,
    /// Accept self-signed server certificates (SQL Server)
    pub trust_server_certificate: bool,
    /// Named instance resolved through the browser service (SQL Server)
    pub instance_name: Option<String>,
    /// Service name in the easy-connect string (Oracle)
    pub service_name: Option<String>,
    /// Journal mode such as `wal` or `delete` (SQLite)
    pub journal_mode: Option<String>,
    /// Lock wait before `SQLITE_BUSY` (SQLite)
    pub busy_timeout: Option<Duration>,
    /// Create the database file when it does not exist (SQLite)
    pub create_if_missing: bool,
    /// Reported to the server for session tracing (PostgreSQL, SQL Server)
    pub application_name: Option<String>,
}

impl EngineOptions {
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn with_ssl_mode(mut self, mode: impl Into<String>) -> Self {
        self.ssl_mode = Some(mode.into());
        self
    }

    pub fn with_encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = Some(encrypt);
        self
    }

    pub fn with_trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn with_journal_mode(mut self, mode: impl Into<String>) -> Self {
        self.journal_mode = Some(mode.into());
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Applies one `key=value` pair from a connection URL query string.
    ///
    /// Returns `false` for keys this struct does not know.
    pub(crate) fn apply_query_param(&mut self, key: &str, value: &str) -> bool {
        match key {
            "charset" => self.charset = Some(value.to_string()),
            "sslmode" | "ssl-mode" | "ssl_mode" => self.ssl_mode = Some(value.to_string()),
            "encrypt" => self.encrypt = Some(parse_flag(value)),
            "trustServerCertificate" | "trust_server_certificate" => {
                self.trust_server_certificate = parse_flag(value);
            }
            "instance" | "instance_name" => self.instance_name = Some(value.to_string()),
            "service_name" | "service" => self.service_name = Some(value.to_string()),
            "journal_mode" => self.journal_mode = Some(value.to_string()),
            "busy_timeout" => match value.parse::<u64>() {
                Ok(ms) => self.busy_timeout = Some(Duration::from_millis(ms)),
                Err(_) => return false,
            },
            "mode" => self.create_if_missing = value == "rwc",
            "application_name" => self.application_name = Some(value.to_string()),
            _ => return false,
        }
        true
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_query_params() {
        let mut options = EngineOptions::default();
        assert!(options.apply_query_param("sslmode", "require"));
        assert!(options.apply_query_param("trustServerCertificate", "true"));
        assert!(options.apply_query_param("busy_timeout", "2500"));
        assert!(options.apply_query_param("mode", "rwc"));
        assert!(!options.apply_query_param("pool_max_conns", "5"));
        assert!(!options.apply_query_param("busy_timeout", "soon"));

        assert_eq!(options.ssl_mode.as_deref(), Some("require"));
        assert!(options.trust_server_certificate);
        assert_eq!(options.busy_timeout, Some(Duration::from_millis(2500)));
        assert!(options.create_if_missing);
    }

    #[test]
    fn test_missing_fields_deserialize_to_defaults() {
        let options: EngineOptions = serde_json::from_str(r#"{"charset":"latin1"}"#).unwrap();
        assert_eq!(options.charset.as_deref(), Some("latin1"));
        assert!(!options.create_if_missing);
        assert!(options.service_name.is_none());
    }
}
