//! Multi-engine SQL adapters and execution layer for DBBridge.
//!
//! One adapter contract covers MySQL, PostgreSQL, SQL Server, Oracle and
//! SQLite. Callers get uniformly shaped, paginated query results and
//! normalized schema metadata regardless of engine.
//!
//! # Security Guarantees
//! - Credentials are zeroized on drop and never serialized, displayed or logged
//! - Connection URLs are redacted before they reach errors or logs
//! - Descriptors handed out by the registry carry no secrets
//!
//! # Architecture
//! - [`adapters`]: the [`EngineAdapter`] trait and one feature-gated adapter per engine
//! - [`query`]: statement splitting, classification, pagination and the batch runner
//! - [`normalize`]: catalog value normalization shared by every adapter
//! - [`registry`]: live `ConnectionId -> adapter` bindings with idle eviction
//! - [`context`]: optional single "current connection" wrapper over a registry

pub mod adapters;
pub mod context;
pub mod error;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod query;
pub mod registry;
pub mod security;

// Re-export commonly used types
pub use adapters::{AdapterFeature, ConnectionConfig, EngineAdapter, EngineOptions, create_adapter};
pub use context::ActiveContext;
pub use error::{DbBridgeError, Result};
pub use models::{
    ColumnDescriptor, ConnectionHealth, ConnectionId, ConnectionState, ConnectionStats,
    DatabaseDescriptor, EngineType, ForeignKeyDescriptor, HealthStatus, IndexDescriptor, JsonRow,
    PageRequest, Pagination, QueryBatchResult, QueryMessage, QueryResultEntry, QueryStats,
    StatementKind, TableDescriptor, TableInfo, TableKind, TriggerDescriptor,
};
pub use registry::{ConnectionInfo, ConnectionRegistry, RegistryEntry};
pub use security::Credentials;
