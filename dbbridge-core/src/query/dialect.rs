//! Per-engine SQL spelling: identifier quoting, literals, row limiting.

use crate::models::EngineType;

/// How an engine spells "return rows m..m+n".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`
    OffsetFetch,
    /// `OFFSET ... FETCH` that is only valid after an `ORDER BY`
    OffsetFetchOrdered,
}

impl EngineType {
    pub fn pagination_style(self) -> PaginationStyle {
        match self {
            Self::MySql | Self::PostgreSql | Self::Sqlite => PaginationStyle::LimitOffset,
            Self::Oracle => PaginationStyle::OffsetFetch,
            Self::SqlServer => PaginationStyle::OffsetFetchOrdered,
        }
    }

    /// Keyword placed between a derived table and its alias.
    pub fn derived_table_alias(self) -> &'static str {
        match self {
            Self::Oracle => " subquery",
            _ => " AS subquery",
        }
    }
}

/// Quotes an identifier for the given engine, doubling embedded quote characters.
///
/// ```rust
/// use dbbridge_core::query::quote_ident;
/// use dbbridge_core::EngineType;
///
/// assert_eq!(quote_ident(EngineType::MySql, "order"), "`order`");
/// assert_eq!(quote_ident(EngineType::SqlServer, "a]b"), "[a]]b]");
/// assert_eq!(quote_ident(EngineType::PostgreSql, "My \"Table\""), "\"My \"\"Table\"\"\"");
/// ```
pub fn quote_ident(engine: EngineType, name: &str) -> String {
    match engine {
        EngineType::MySql => format!("`{}`", name.replace('`', "``")),
        EngineType::SqlServer => format!("[{}]", name.replace(']', "]]")),
        EngineType::PostgreSql | EngineType::Oracle | EngineType::Sqlite => {
            format!("\"{}\"", name.replace('"', "\"\""))
        }
    }
}

/// Single-quoted string literal with embedded quotes doubled.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
