//! Conversion of raw catalog values into uniform descriptor fields.
//!
//! Adapters read their engine's catalog into the flat row structs here and
//! let these helpers apply the shared rules: sentinel dimensions become
//! `None`, flags become booleans, per-column index and foreign-key rows are
//! grouped in catalog order.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{ForeignKeyDescriptor, IndexDescriptor};

/// Length/precision/scale as reported by a catalog.
///
/// Negative sentinels (`-1` for `MAX` types) and values that do not fit a
/// `u32` mean "unbounded" and map to `None`.
///
/// ```rust
/// use dbbridge_core::normalize::normalize_dimension;
///
/// assert_eq!(normalize_dimension(Some(255)), Some(255));
/// assert_eq!(normalize_dimension(Some(-1)), None);
/// assert_eq!(normalize_dimension(None), None);
/// ```
pub fn normalize_dimension(raw: Option<i64>) -> Option<u32> {
    raw.and_then(|value| u32::try_from(value).ok())
}

/// Interprets catalog nullability markers (`YES`/`NO`, `Y`/`N`, `1`/`0`).
pub fn is_nullable_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_uppercase().as_str(),
        "YES" | "Y" | "1" | "TRUE" | "T"
    )
}

/// Trims a column default and unwraps SQL Server's `((0))` style parentheses.
///
/// A literal `NULL` default is the same as no default.
pub fn normalize_default(raw: Option<String>) -> Option<String> {
    let mut value = raw?.trim().to_string();
    while value.len() >= 2 && value.starts_with('(') && value.ends_with(')') && balanced_inner(&value) {
        value = value[1..value.len().saturating_sub(1)].trim().to_string();
    }
    if value.is_empty() || value.eq_ignore_ascii_case("NULL") {
        None
    } else {
        Some(value)
    }
}

/// True when the outer parentheses of `value` enclose the whole expression.
fn balanced_inner(value: &str) -> bool {
    let inner = &value[1..value.len().saturating_sub(1)];
    let mut depth: i32 = 0;
    for c in inner.chars() {
        match c {
            '(' => depth = depth.saturating_add(1),
            ')' => {
                depth = depth.saturating_sub(1);
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Uppercases a referential action and maps `NO_ACTION`/`SET_NULL` spellings.
///
/// SQLite's `NONE` and empty values become `None`.
pub fn normalize_referential_action(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim().replace('_', " ").to_ascii_uppercase();
    if value.is_empty() || value == "NONE" {
        None
    } else {
        Some(value)
    }
}

struct TypePatterns {
    dimensions: Regex,
    trigger_timing: Regex,
    trigger_event: Regex,
}

impl TypePatterns {
    fn instance() -> &'static Self {
        static PATTERNS: OnceLock<TypePatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| Self {
            dimensions: Regex::new(r"\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\)")
                .expect("Invalid type dimension pattern"),
            trigger_timing: Regex::new(r"(?i)\b(BEFORE|AFTER|INSTEAD\s+OF)\b")
                .expect("Invalid trigger timing pattern"),
            trigger_event: Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE)\b")
                .expect("Invalid trigger event pattern"),
        })
    }
}

/// Extracts `(n)` or `(p, s)` from a declared type such as `DECIMAL(10,2)`.
///
/// ```rust
/// use dbbridge_core::normalize::parse_type_dimensions;
///
/// assert_eq!(parse_type_dimensions("varchar(40)"), (Some(40), None));
/// assert_eq!(parse_type_dimensions("NUMERIC(12, 4)"), (Some(12), Some(4)));
/// assert_eq!(parse_type_dimensions("TEXT"), (None, None));
/// ```
pub fn parse_type_dimensions(declared: &str) -> (Option<u32>, Option<u32>) {
    let Some(caps) = TypePatterns::instance().dimensions.captures(declared) else {
        return (None, None);
    };
    let first = caps.get(1).and_then(|m| m.as_str().parse().ok());
    let second = caps.get(2).and_then(|m| m.as_str().parse().ok());
    (first, second)
}

/// True for declared types whose first dimension is a character/byte length.
pub fn is_length_type(declared: &str) -> bool {
    let upper = declared.to_ascii_uppercase();
    ["CHAR", "TEXT", "CLOB", "BINARY", "BLOB", "RAW"]
        .iter()
        .any(|marker| upper.contains(marker))
}

/// Pulls `BEFORE`/`AFTER`/`INSTEAD OF` out of trigger SQL or a trigger-type string.
pub fn parse_trigger_timing(text: &str) -> Option<String> {
    TypePatterns::instance()
        .trigger_timing
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            m.as_str()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_ascii_uppercase()
        })
}

/// Pulls the first `INSERT`/`UPDATE`/`DELETE` out of trigger SQL.
pub fn parse_trigger_event(text: &str) -> Option<String> {
    TypePatterns::instance()
        .trigger_event
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// One `(index, column)` catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumnRow {
    pub index_name: String,
    pub column_name: String,
    pub is_unique: bool,
    pub is_primary: bool,
    pub index_type: Option<String>,
}

/// Groups per-column index rows into descriptors, keeping first-seen order.
pub fn group_index_columns(rows: Vec<IndexColumnRow>) -> Vec<IndexDescriptor> {
    let mut indexes: Vec<IndexDescriptor> = Vec::new();
    for row in rows {
        match indexes.iter_mut().find(|idx| idx.name == row.index_name) {
            Some(existing) => existing.columns.push(row.column_name),
            None => indexes.push(IndexDescriptor {
                name: row.index_name,
                columns: vec![row.column_name],
                is_unique: row.is_unique || row.is_primary,
                is_primary: row.is_primary,
                index_type: row.index_type,
            }),
        }
    }
    indexes
}

/// One `(constraint, column pair)` catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyColumnRow {
    /// Constraint name, or a synthetic key for engines without names
    pub constraint_name: String,
    /// Whether `constraint_name` is a real catalog name
    pub named: bool,
    pub column_name: String,
    pub referenced_schema: Option<String>,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
}

/// Groups per-column foreign key rows into descriptors, keeping first-seen order.
pub fn group_foreign_keys(rows: Vec<ForeignKeyColumnRow>) -> Vec<ForeignKeyDescriptor> {
    let mut keys: Vec<(String, ForeignKeyDescriptor)> = Vec::new();
    for row in rows {
        match keys.iter_mut().find(|(name, _)| *name == row.constraint_name) {
            Some((_, existing)) => {
                existing.columns.push(row.column_name);
                existing.referenced_columns.push(row.referenced_column);
            }
            None => {
                let descriptor = ForeignKeyDescriptor {
                    name: row.named.then(|| row.constraint_name.clone()),
                    columns: vec![row.column_name],
                    referenced_schema: row.referenced_schema,
                    referenced_table: row.referenced_table,
                    referenced_columns: vec![row.referenced_column],
                    on_update: normalize_referential_action(row.on_update.as_deref()),
                    on_delete: normalize_referential_action(row.on_delete.as_deref()),
                };
                keys.push((row.constraint_name, descriptor));
            }
        }
    }
    keys.into_iter().map(|(_, descriptor)| descriptor).collect()
}
