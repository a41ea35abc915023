//! Recognition of `SHOW` / `DESCRIBE` style schema commands.
//!
//! Engines without native support translate these into catalog queries; see
//! each adapter's `resolve_introspection`.

use std::sync::OnceLock;

use regex::Regex;

use super::classifier::strip_leading_comments;

/// A possibly schema-qualified table reference taken from a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Parses `name`, `schema.name` and quoted forms (`"x"`, `` `x` ``, `[x]`).
    pub fn parse(raw: &str) -> Self {
        let unquote = |part: &str| {
            part.trim()
                .trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
                .to_string()
        };
        match raw.rsplit_once('.') {
            Some((schema, name)) => Self {
                schema: Some(unquote(schema)),
                name: unquote(name),
            },
            None => Self {
                schema: None,
                name: unquote(raw),
            },
        }
    }
}

/// Introspection commands understood across engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntrospectionCommand {
    /// `SHOW DATABASES` / `SHOW SCHEMAS`
    ShowDatabases,
    /// `SHOW [FULL] TABLES`
    ShowTables,
    /// `SHOW COLUMNS FROM t`, `DESCRIBE t`, `DESC t`
    ShowColumns(TableRef),
    /// `SHOW INDEX|INDEXES|KEYS FROM t`
    ShowIndexes(TableRef),
}

struct CommandPatterns {
    databases: Regex,
    tables: Regex,
    columns: Regex,
    indexes: Regex,
    describe: Regex,
}

impl CommandPatterns {
    fn instance() -> &'static Self {
        static PATTERNS: OnceLock<CommandPatterns> = OnceLock::new();
        PATTERNS.get_or_init(|| Self {
            databases: Regex::new(r"(?i)^SHOW\s+(DATABASES|SCHEMAS)\s*$")
                .expect("Invalid databases pattern"),
            tables: Regex::new(r"(?i)^SHOW\s+(FULL\s+)?TABLES\s*$").expect("Invalid tables pattern"),
            columns: Regex::new(r"(?i)^SHOW\s+(FULL\s+)?(COLUMNS|FIELDS)\s+(FROM|IN)\s+(\S+)\s*$")
                .expect("Invalid columns pattern"),
            indexes: Regex::new(r"(?i)^SHOW\s+(INDEX|INDEXES|KEYS)\s+(FROM|IN)\s+(\S+)\s*$")
                .expect("Invalid indexes pattern"),
            describe: Regex::new(r"(?i)^(DESCRIBE|DESC)\s+(\S+)\s*$")
                .expect("Invalid describe pattern"),
        })
    }
}

impl IntrospectionCommand {
    /// Recognises a command; `None` for anything else (`EXPLAIN`, `PRAGMA`, filtered `SHOW`s).
    ///
    /// ```rust
    /// use dbbridge_core::query::{IntrospectionCommand, TableRef};
    ///
    /// let cmd = IntrospectionCommand::parse("DESCRIBE sales.orders");
    /// assert_eq!(
    ///     cmd,
    ///     Some(IntrospectionCommand::ShowColumns(TableRef {
    ///         schema: Some("sales".into()),
    ///         name: "orders".into(),
    ///     }))
    /// );
    /// ```
    pub fn parse(statement: &str) -> Option<Self> {
        let text = strip_leading_comments(statement)
            .trim()
            .trim_end_matches(';')
            .trim_end();
        let patterns = CommandPatterns::instance();

        if patterns.databases.is_match(text) {
            return Some(Self::ShowDatabases);
        }
        if patterns.tables.is_match(text) {
            return Some(Self::ShowTables);
        }
        if let Some(caps) = patterns.columns.captures(text) {
            return caps.get(4).map(|m| Self::ShowColumns(TableRef::parse(m.as_str())));
        }
        if let Some(caps) = patterns.indexes.captures(text) {
            return caps.get(3).map(|m| Self::ShowIndexes(TableRef::parse(m.as_str())));
        }
        if let Some(caps) = patterns.describe.captures(text) {
            return caps.get(2).map(|m| Self::ShowColumns(TableRef::parse(m.as_str())));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableRef {
        TableRef {
            schema: None,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            IntrospectionCommand::parse("show databases"),
            Some(IntrospectionCommand::ShowDatabases)
        );
        assert_eq!(
            IntrospectionCommand::parse("SHOW SCHEMAS;"),
            Some(IntrospectionCommand::ShowDatabases)
        );
        assert_eq!(
            IntrospectionCommand::parse("SHOW FULL TABLES"),
            Some(IntrospectionCommand::ShowTables)
        );
        assert_eq!(
            IntrospectionCommand::parse("SHOW COLUMNS FROM users"),
            Some(IntrospectionCommand::ShowColumns(table("users")))
        );
        assert_eq!(
            IntrospectionCommand::parse("desc `users`"),
            Some(IntrospectionCommand::ShowColumns(table("users")))
        );
        assert_eq!(
            IntrospectionCommand::parse("SHOW KEYS IN [orders]"),
            Some(IntrospectionCommand::ShowIndexes(table("orders")))
        );
    }

    #[test]
    fn test_unresolvable_commands() {
        assert_eq!(IntrospectionCommand::parse("EXPLAIN SELECT 1"), None);
        assert_eq!(IntrospectionCommand::parse("PRAGMA table_info(users)"), None);
        assert_eq!(IntrospectionCommand::parse("SHOW TABLES LIKE 'a%'"), None);
        assert_eq!(IntrospectionCommand::parse("SHOW VARIABLES"), None);
    }

    #[test]
    fn test_table_ref_parse() {
        assert_eq!(
            TableRef::parse("\"public\".\"Users\""),
            TableRef {
                schema: Some("public".to_string()),
                name: "Users".to_string()
            }
        );
        assert_eq!(TableRef::parse("[dbo].[orders]").schema.as_deref(), Some("dbo"));
        assert_eq!(TableRef::parse("plain").schema, None);
    }
}
