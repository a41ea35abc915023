//! Statement splitting and classification.
//!
//! Splitting is naive: a `;` inside a string literal or a
//! procedural block splits the text too.

use std::sync::OnceLock;

use regex::Regex;

use super::lexer::blank_non_code;
use crate::models::StatementKind;

/// Leading keywords per kind, in priority order. First match wins.
const CLASSIFICATION_RULES: &[(StatementKind, &[&str])] = &[
    (StatementKind::Select, &["SELECT", "WITH", "VALUES", "TABLE"]),
    (
        StatementKind::SchemaIntrospection,
        &["SHOW", "DESCRIBE", "DESC", "EXPLAIN", "PRAGMA"],
    ),
    (
        StatementKind::Mutation,
        &["INSERT", "UPDATE", "DELETE", "MERGE", "REPLACE", "UPSERT"],
    ),
    (
        StatementKind::Ddl,
        &["CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME", "COMMENT"],
    ),
    (StatementKind::Permission, &["GRANT", "REVOKE", "DENY"]),
    (
        StatementKind::TransactionControl,
        &[
            "BEGIN", "START", "COMMIT", "ROLLBACK", "SAVEPOINT", "RELEASE", "END",
        ],
    ),
];

/// Compiled patterns used by the classifier and pagination injector.
pub(crate) struct StatementPatterns {
    /// Any clause that already bounds the number of rows returned
    pub limiting_clause: Regex,
    /// An ORDER BY clause; match it against top-level code only
    pub order_by: Regex,
}

impl StatementPatterns {
    pub(crate) fn instance() -> &'static Self {
        static PATTERNS: OnceLock<StatementPatterns> = OnceLock::new();
        PATTERNS.get_or_init(Self::compile)
    }

    fn compile() -> Self {
        Self {
            limiting_clause: Regex::new(
                r"(?is)\bLIMIT\b|\bFETCH\s+(FIRST|NEXT)\b|^\s*SELECT\s+(ALL\s+|DISTINCT\s+)?TOP\b|\bOFFSET\s+\S+\s+ROWS?\b|\bROWNUM\b",
            )
            .expect("Invalid limiting clause pattern"),
            order_by: Regex::new(r"(?is)\bORDER\s+BY\b").expect("Invalid order by pattern"),
        }
    }
}

/// Skips leading whitespace, `--` line comments and `/* */` block comments.
///
/// An unterminated block comment swallows the rest of the text.
pub fn strip_leading_comments(statement: &str) -> &str {
    let mut rest = statement.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else {
            return rest;
        }
    }
}

/// Splits request text into trimmed, non-empty statements.
///
/// ```rust
/// use dbbridge_core::query::split_statements;
///
/// let parts = split_statements("SELECT 1; ;\n SELECT 2;");
/// assert_eq!(parts, vec!["SELECT 1", "SELECT 2"]);
/// ```
pub fn split_statements(text: &str) -> Vec<String> {
    text.split(';')
        .map(str::trim)
        .filter(|s| !strip_leading_comments(s).is_empty())
        .map(str::to_string)
        .collect()
}

/// Leading keyword, uppercased, ignoring comments and opening parentheses.
fn leading_keyword(statement: &str) -> String {
    strip_leading_comments(statement)
        .trim_start_matches(|c: char| c == '(' || c.is_whitespace())
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '_')
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Classifies a single statement by its leading keyword.
///
/// ```rust
/// use dbbridge_core::query::classify;
/// use dbbridge_core::StatementKind;
///
/// assert_eq!(classify("  select * from t"), StatementKind::Select);
/// assert_eq!(classify("SHOW TABLES"), StatementKind::SchemaIntrospection);
/// assert_eq!(classify("SELCT 1"), StatementKind::Unrecognized);
/// ```
pub fn classify(statement: &str) -> StatementKind {
    let keyword = leading_keyword(statement);
    if keyword.is_empty() {
        return StatementKind::Unrecognized;
    }

    CLASSIFICATION_RULES
        .iter()
        .find(|(_, keywords)| keywords.contains(&keyword.as_str()))
        .map_or(StatementKind::Unrecognized, |(kind, _)| *kind)
}

/// True for `INSERT`/`REPLACE` statements, the only ones reporting an insert id.
pub fn is_insert_statement(statement: &str) -> bool {
    matches!(leading_keyword(statement).as_str(), "INSERT" | "REPLACE")
}

/// True when the statement already bounds its row count
/// (`LIMIT`, `FETCH FIRST/NEXT`, `TOP`, `OFFSET n ROWS`, `ROWNUM`).
///
/// Keywords inside string literals, quoted identifiers and comments are ignored.
pub fn has_limiting_clause(statement: &str) -> bool {
    StatementPatterns::instance()
        .limiting_clause
        .is_match(&blank_non_code(statement, false))
}

/// True when the outermost query carries its own `ORDER BY`.
///
/// Orderings inside `OVER (...)`, subqueries, literals and comments do not count.
pub(crate) fn has_top_level_order_by(statement: &str) -> bool {
    StatementPatterns::instance()
        .order_by
        .is_match(&blank_non_code(statement, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_insert_statement() {
        assert!(is_insert_statement("/* load */ insert into t values (1)"));
        assert!(is_insert_statement("REPLACE INTO t VALUES (1)"));
        assert!(!is_insert_statement("UPDATE t SET a = 1"));
    }

    #[test]
    fn test_split_drops_empties_and_comment_only_parts() {
        let parts = split_statements("SELECT 1;;  \n; -- trailing note\n");
        assert_eq!(parts, vec!["SELECT 1"]);

        let parts = split_statements("INSERT INTO t VALUES (1); UPDATE t SET a = 2");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1], "UPDATE t SET a = 2");
    }

    #[test]
    fn test_split_is_naive_about_literals() {
        let parts = split_statements("SELECT 'a;b'");
        assert_eq!(parts, vec!["SELECT 'a", "b'"]);
    }

    #[test]
    fn test_classification_table() {
        let cases = [
            ("SELECT * FROM users", StatementKind::Select),
            ("with x as (select 1) select * from x", StatementKind::Select),
            ("(SELECT 1) UNION (SELECT 2)", StatementKind::Select),
            ("SHOW DATABASES", StatementKind::SchemaIntrospection),
            ("describe users", StatementKind::SchemaIntrospection),
            ("DESC users", StatementKind::SchemaIntrospection),
            ("EXPLAIN SELECT 1", StatementKind::SchemaIntrospection),
            ("PRAGMA table_info(users)", StatementKind::SchemaIntrospection),
            ("INSERT INTO t VALUES (1)", StatementKind::Mutation),
            ("update t set a = 1", StatementKind::Mutation),
            ("MERGE INTO t USING s ON 1=1", StatementKind::Mutation),
            ("CREATE TABLE t (id INT)", StatementKind::Ddl),
            ("TRUNCATE TABLE t", StatementKind::Ddl),
            ("GRANT SELECT ON t TO bob", StatementKind::Permission),
            ("REVOKE ALL ON t FROM bob", StatementKind::Permission),
            ("BEGIN", StatementKind::TransactionControl),
            ("START TRANSACTION", StatementKind::TransactionControl),
            ("rollback", StatementKind::TransactionControl),
            ("USE analytics", StatementKind::Unrecognized),
            ("SELCT BAD SYNTAX", StatementKind::Unrecognized),
            ("", StatementKind::Unrecognized),
        ];

        for (statement, expected) in cases {
            assert_eq!(classify(statement), expected, "statement: {statement}");
        }
    }

    #[test]
    fn test_classification_skips_leading_comments() {
        assert_eq!(
            classify("-- list users\nSELECT * FROM users"),
            StatementKind::Select
        );
        assert_eq!(
            classify("/* cleanup */ DELETE FROM sessions"),
            StatementKind::Mutation
        );
        assert_eq!(
            classify("/* a */ -- b\n /* c */ DROP TABLE x"),
            StatementKind::Ddl
        );
    }

    #[test]
    fn test_has_limiting_clause() {
        assert!(has_limiting_clause("SELECT * FROM t LIMIT 10"));
        assert!(has_limiting_clause("SELECT * FROM t limit 5 offset 10"));
        assert!(has_limiting_clause("SELECT TOP 10 * FROM t"));
        assert!(has_limiting_clause("select distinct top (5) a from t"));
        assert!(has_limiting_clause(
            "SELECT * FROM t ORDER BY id OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        ));
        assert!(has_limiting_clause("SELECT * FROM t FETCH FIRST 3 ROWS ONLY"));
        assert!(has_limiting_clause("SELECT * FROM t WHERE ROWNUM <= 10"));

        assert!(!has_limiting_clause("SELECT * FROM t"));
        assert!(!has_limiting_clause("SELECT limited FROM t"));
        assert!(!has_limiting_clause("SELECT * FROM stop_words"));
    }

    #[test]
    fn test_limit_words_in_literals_and_comments_do_not_count() {
        assert!(!has_limiting_clause("SELECT 'LIMIT 5' AS note FROM t"));
        assert!(!has_limiting_clause("SELECT [limit] FROM t"));
        assert!(!has_limiting_clause("SELECT a FROM t -- LIMIT 10"));
        assert!(!has_limiting_clause("/* TOP 3 */ SELECT a FROM t"));
        assert!(has_limiting_clause("/* note */ SELECT TOP 3 a FROM t"));
    }

    #[test]
    fn test_top_level_order_by() {
        assert!(has_top_level_order_by("SELECT a FROM t ORDER BY a"));
        assert!(has_top_level_order_by(
            "SELECT a FROM (SELECT a FROM t) s ORDER BY a"
        ));
        assert!(!has_top_level_order_by(
            "SELECT a, ROW_NUMBER() OVER (ORDER BY a) AS rn FROM t"
        ));
        assert!(!has_top_level_order_by(
            "SELECT * FROM (SELECT TOP 5 a FROM t ORDER BY a) s"
        ));
        assert!(!has_top_level_order_by("SELECT 'ORDER BY' AS label FROM t"));
        assert!(!has_top_level_order_by("SELECT a FROM t -- ORDER BY a"));
    }
}
