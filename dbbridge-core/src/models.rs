//! Data model shared by every engine adapter.
//!
//! Descriptor shapes are uniform across engines: optional fields serialize as
//! `null` rather than being omitted, and list fields are always present.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DbBridgeError;

/// One result row: column name to JSON value, in select-list order.
pub type JsonRow = serde_json::Map<String, serde_json::Value>;

/// Supported engine families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    /// Family A: session-level database selection
    MySql,
    /// Family B: one database per connection
    PostgreSql,
    /// Family C: session-level database selection, bracket quoting
    SqlServer,
    /// Family D: schema-oriented
    Oracle,
    /// Family E: embedded file database
    Sqlite,
}

impl EngineType {
    pub const ALL: [Self; 5] = [
        Self::MySql,
        Self::PostgreSql,
        Self::SqlServer,
        Self::Oracle,
        Self::Sqlite,
    ];

    /// Default TCP port, `None` for the embedded engine.
    pub fn default_port(self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::PostgreSql => Some(5432),
            Self::SqlServer => Some(1433),
            Self::Oracle => Some(1521),
            Self::Sqlite => None,
        }
    }

    /// True for engines reached over the network.
    pub fn is_server(self) -> bool {
        !matches!(self, Self::Sqlite)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
            Self::SqlServer => "sqlserver",
            Self::Oracle => "oracle",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineType {
    type Err = DbBridgeError;

    /// Accepts engine names and URL schemes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Self::PostgreSql),
            "mssql" | "sqlserver" | "sql-server" => Ok(Self::SqlServer),
            "oracle" => Ok(Self::Oracle),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(DbBridgeError::configuration(format!(
                "Unknown engine type '{other}'"
            ))),
        }
    }
}

/// Registry key for one live adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = DbBridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DbBridgeError::configuration(format!("Invalid connection id '{s}': {e}")))
    }
}

/// Lifecycle of a connection.
///
/// `Disconnected -> Connecting -> Connected | Error`,
/// `Connected -> Switching -> Connected | Error`, `Connected -> Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Switching,
    Error,
}

impl ConnectionState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Switching => 3,
            Self::Error => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Switching,
            4 => Self::Error,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Switching => "switching",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Lock-free cell holding a [`ConnectionState`].
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }

    /// Moves to `to` only if the current state is `from`.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicConnectionState {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}

/// Classification of one statement, decided by its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    SchemaIntrospection,
    Mutation,
    Ddl,
    Permission,
    TransactionControl,
    Unrecognized,
}

impl StatementKind {
    /// True when the statement produces a result set.
    pub fn returns_rows(self) -> bool {
        matches!(self, Self::Select | Self::SchemaIntrospection)
    }
}

/// Requested page, both values at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub const DEFAULT_PAGE_SIZE: u32 = 100;

    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
        }
    }

    /// Rows skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)).saturating_mul(u64::from(self.page_size))
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_PAGE_SIZE)
    }
}

/// Page bookkeeping for reads that had a limiting clause injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub has_more: bool,
}

impl Pagination {
    /// Derives page counts from the total row count.
    ///
    /// ```rust
    /// use dbbridge_core::{PageRequest, Pagination};
    ///
    /// let p = Pagination::compute(101, PageRequest::new(2, 50));
    /// assert_eq!(p.total_pages, 3);
    /// assert!(p.has_more);
    /// ```
    pub fn compute(total_rows: u64, request: PageRequest) -> Self {
        let total_pages = total_rows.div_ceil(u64::from(request.page_size));
        Self {
            page: request.page,
            page_size: request.page_size,
            total_pages,
            has_more: u64::from(request.page) < total_pages,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// Informational, warning or error text attached to one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMessage {
    pub text: String,
    pub level: MessageLevel,
    pub is_error: bool,
}

impl QueryMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: MessageLevel::Info,
            is_error: false,
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: MessageLevel::Warning,
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level: MessageLevel::Error,
            is_error: true,
        }
    }
}

/// Engine-reported effects of a non-read statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    pub affected_rows: Option<u64>,
    pub insert_id: Option<u64>,
}

/// Outcome of one statement within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultEntry {
    pub query: String,
    #[serde(rename = "type")]
    pub kind: StatementKind,
    pub rows: Vec<JsonRow>,
    pub total_rows: Option<u64>,
    pub messages: Vec<QueryMessage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stats: Option<QueryStats>,
    pub elapsed_ms: u64,
}

impl QueryResultEntry {
    pub fn new(query: impl Into<String>, kind: StatementKind) -> Self {
        Self {
            query: query.into(),
            kind,
            rows: Vec::new(),
            total_rows: None,
            messages: Vec::new(),
            pagination: None,
            stats: None,
            elapsed_ms: 0,
        }
    }

    pub fn has_error(&self) -> bool {
        self.messages.iter().any(|m| m.is_error)
    }
}

/// Response for one `execute_query` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBatchResult {
    pub queries: Vec<QueryResultEntry>,
    pub total_queries: usize,
    pub executed_at: DateTime<Utc>,
}

/// A database (or schema, for schema-oriented engines) visible to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDescriptor {
    pub name: String,
    pub size_bytes: Option<u64>,
    pub tables: Vec<String>,
    pub views: Vec<String>,
    pub is_current: bool,
    pub error: Option<String>,
}

impl DatabaseDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size_bytes: None,
            tables: Vec::new(),
            views: Vec::new(),
            is_current: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Table,
    View,
}

impl TableKind {
    /// Maps catalog table-type strings (`BASE TABLE`, `VIEW`, `v`, ...).
    pub fn from_catalog(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        if upper.contains("VIEW") || upper == "V" || upper == "M" {
            Self::View
        } else {
            Self::Table
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub name: String,
    pub schema: Option<String>,
    pub kind: TableKind,
    /// Catalog estimate, not an exact count
    pub row_count: Option<u64>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default_value: Option<String>,
    pub max_length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
    pub ordinal_position: u32,
    pub comment: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal_position: u32) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            default_value: None,
            max_length: None,
            precision: None,
            scale: None,
            is_primary_key: false,
            is_auto_increment: false,
            ordinal_position,
            comment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
    pub index_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyDescriptor {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub referenced_schema: Option<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDescriptor {
    pub name: String,
    pub timing: Option<String>,
    pub event: Option<String>,
    pub definition: Option<String>,
}

/// Full description of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub database: String,
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    pub triggers: Vec<TriggerDescriptor>,
    pub row_count: Option<u64>,
    pub error: Option<String>,
}

impl TableInfo {
    pub fn empty(database: impl Into<String>, schema: Option<String>, name: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema,
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            triggers: Vec::new(),
            row_count: None,
            error: None,
        }
    }

    /// Placeholder for a table whose lookup failed inside a multi-table request.
    pub fn failed(database: &str, name: &str, error: &DbBridgeError) -> Self {
        let mut info = Self::empty(database, None, name);
        info.error = Some(error.to_string());
        info
    }
}

/// Pool counters reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub engine: EngineType,
    pub state: ConnectionState,
    pub target: Option<String>,
    pub pool_size: u32,
    pub idle_connections: u32,
    pub in_use: u32,
    pub max_connections: u32,
    /// Bumped every time the native pool is rebuilt
    pub pool_generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of probing one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub connection_id: ConnectionId,
    pub engine: EngineType,
    pub status: HealthStatus,
    pub state: ConnectionState,
    pub target: Option<String>,
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_type_parsing() {
        assert_eq!("postgres".parse::<EngineType>().ok(), Some(EngineType::PostgreSql));
        assert_eq!("MSSQL".parse::<EngineType>().ok(), Some(EngineType::SqlServer));
        assert_eq!("sqlite3".parse::<EngineType>().ok(), Some(EngineType::Sqlite));
        assert!("mongodb".parse::<EngineType>().is_err());
    }

    #[test]
    fn test_engine_type_serde_matches_display() {
        for engine in EngineType::ALL {
            let json = serde_json::to_string(&engine).unwrap();
            assert_eq!(json, format!("\"{engine}\""));
        }
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(EngineType::MySql.default_port(), Some(3306));
        assert_eq!(EngineType::Oracle.default_port(), Some(1521));
        assert_eq!(EngineType::Sqlite.default_port(), None);
    }

    #[test]
    fn test_atomic_state_transitions() {
        let state = AtomicConnectionState::default();
        assert_eq!(state.get(), ConnectionState::Disconnected);
        assert!(state.transition(ConnectionState::Disconnected, ConnectionState::Connecting));
        assert!(!state.transition(ConnectionState::Disconnected, ConnectionState::Connected));
        state.set(ConnectionState::Switching);
        assert_eq!(state.get(), ConnectionState::Switching);
    }

    #[test]
    fn test_page_request_clamps_to_one() {
        let request = PageRequest::new(0, 0);
        assert_eq!(request.page, 1);
        assert_eq!(request.page_size, 1);
        assert_eq!(request.offset(), 0);
        assert_eq!(PageRequest::new(3, 25).offset(), 50);
    }

    #[test]
    fn test_pagination_compute() {
        let p = Pagination::compute(0, PageRequest::new(1, 10));
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_more);

        let p = Pagination::compute(30, PageRequest::new(3, 10));
        assert_eq!(p.total_pages, 3);
        assert!(!p.has_more);

        let p = Pagination::compute(31, PageRequest::new(3, 10));
        assert_eq!(p.total_pages, 4);
        assert!(p.has_more);
    }

    #[test]
    fn test_result_entry_wire_shape() {
        let mut entry = QueryResultEntry::new("SELECT 1", StatementKind::Select);
        entry.total_rows = Some(1);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["type"], "select");
        assert_eq!(json["totalRows"], 1);
        assert!(json.get("pagination").is_none());
        assert!(json.get("stats").is_none());
    }

    #[test]
    fn test_descriptor_nulls_are_kept() {
        let column = ColumnDescriptor::new("id", "INTEGER", 1);
        let json = serde_json::to_value(&column).unwrap();
        assert!(json.get("maxLength").is_some_and(serde_json::Value::is_null));
        assert!(json.get("defaultValue").is_some_and(serde_json::Value::is_null));

        let info = TableInfo::empty("main", None, "users");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["indexes"], serde_json::json!([]));
        assert_eq!(json["foreignKeys"], serde_json::json!([]));
        assert_eq!(json["triggers"], serde_json::json!([]));
    }

    #[test]
    fn test_table_kind_from_catalog() {
        assert_eq!(TableKind::from_catalog("BASE TABLE"), TableKind::Table);
        assert_eq!(TableKind::from_catalog("VIEW"), TableKind::View);
        assert_eq!(TableKind::from_catalog("SYSTEM VIEW"), TableKind::View);
        assert_eq!(TableKind::from_catalog("table"), TableKind::Table);
    }
}
