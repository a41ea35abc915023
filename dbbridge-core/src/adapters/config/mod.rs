//! Configuration types for engine adapters.
//!
//! - `ConnectionConfig`: engine, address, target, pool and timeout settings
//! - `EngineOptions`: engine-specific tuning
//!
//! # Security
//! These configuration structs intentionally do NOT store passwords or credentials.
//! Credentials are handled separately through the security module.

mod connection;
mod options;

pub use connection::{ConnectionConfig, MAX_POOL_CONNECTIONS, validate_target_name};
pub use options::EngineOptions;
