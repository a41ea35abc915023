//! Logging setup for processes embedding DBBridge.
//!
//! The library itself only emits `tracing` events; hosts call one of these
//! initializers once at startup.

use tracing_subscriber::EnvFilter;

use crate::Result;
use crate::error::DbBridgeError;

/// Maps CLI-style verbosity flags onto a tracing level.
pub fn level_for(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    }
}

/// Builds the filter, letting `RUST_LOG` override the verbosity flags.
fn env_filter(verbose: u8, quiet: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbose, quiet).as_str().to_lowercase()))
}

/// Initializes human-readable structured logging.
///
/// # Arguments
/// * `verbose` - Verbosity level (0=INFO, 1=DEBUG, 2+=TRACE)
/// * `quiet` - If true, only show ERROR level logs
///
/// # Example
/// ```rust,no_run
/// use dbbridge_core::logging::init_logging;
///
/// init_logging(1, false).expect("Failed to initialize logging");
/// ```
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose, quiet))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init()
        .map_err(|e| DbBridgeError::configuration(format!("Failed to initialize logging: {e}")))
}

/// Initializes newline-delimited JSON logging for service deployments.
pub fn init_json_logging(verbose: u8, quiet: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter(verbose, quiet))
        .with_current_span(false)
        .try_init()
        .map_err(|e| DbBridgeError::configuration(format!("Failed to initialize logging: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Logging can only be initialized once per test process, so only the
    // level mapping is exercised here.

    #[test]
    fn test_verbosity_levels() {
        let test_cases = [
            ((true, 0), tracing::Level::ERROR),
            ((true, 5), tracing::Level::ERROR),
            ((false, 0), tracing::Level::INFO),
            ((false, 1), tracing::Level::DEBUG),
            ((false, 2), tracing::Level::TRACE),
            ((false, 10), tracing::Level::TRACE),
        ];

        for ((quiet, verbose), expected) in test_cases {
            assert_eq!(
                level_for(verbose, quiet),
                expected,
                "Failed for quiet={quiet}, verbose={verbose}"
            );
        }
    }
}
