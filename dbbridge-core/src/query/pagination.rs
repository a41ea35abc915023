//! Pagination injection and count-query construction for read statements.

use super::classifier::{has_limiting_clause, has_top_level_order_by};
use super::dialect::PaginationStyle;
use super::lexer::strip_trailing_comments;
use crate::models::{EngineType, PageRequest};

/// Removes trailing comments, semicolons and whitespace.
fn trim_statement(statement: &str) -> &str {
    let mut body = statement.trim();
    loop {
        let trimmed = strip_trailing_comments(body).trim_end_matches(';').trim_end();
        if trimmed.len() == body.len() {
            return trimmed;
        }
        body = trimmed;
    }
}

/// Appends the engine's limiting clause unless the statement already limits rows.
///
/// Applying it twice yields the same text as applying it once.
///
/// ```rust
/// use dbbridge_core::query::paginate;
/// use dbbridge_core::{EngineType, PageRequest};
///
/// let sql = paginate("SELECT * FROM users", EngineType::PostgreSql, PageRequest::new(3, 20));
/// assert_eq!(sql, "SELECT * FROM users LIMIT 20 OFFSET 40");
/// assert_eq!(paginate(&sql, EngineType::PostgreSql, PageRequest::new(3, 20)), sql);
/// ```
pub fn paginate(statement: &str, engine: EngineType, page: PageRequest) -> String {
    let body = trim_statement(statement);
    if has_limiting_clause(body) {
        return body.to_string();
    }

    let offset = page.offset();
    let size = page.page_size;
    match engine.pagination_style() {
        PaginationStyle::LimitOffset => format!("{body} LIMIT {size} OFFSET {offset}"),
        PaginationStyle::OffsetFetch => {
            format!("{body} OFFSET {offset} ROWS FETCH NEXT {size} ROWS ONLY")
        }
        PaginationStyle::OffsetFetchOrdered => {
            let order = if has_top_level_order_by(body) {
                ""
            } else {
                " ORDER BY (SELECT NULL)"
            };
            format!("{body}{order} OFFSET {offset} ROWS FETCH NEXT {size} ROWS ONLY")
        }
    }
}

/// Wraps a read statement so the engine counts its full result.
///
/// ```rust
/// use dbbridge_core::query::count_query;
/// use dbbridge_core::EngineType;
///
/// assert_eq!(
///     count_query("SELECT id FROM t;", EngineType::MySql),
///     "SELECT COUNT(*) FROM (SELECT id FROM t) AS subquery"
/// );
/// ```
pub fn count_query(statement: &str, engine: EngineType) -> String {
    format!(
        "SELECT COUNT(*) FROM ({}){}",
        trim_statement(statement),
        engine.derived_table_alias()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_offset_engines() {
        for engine in [EngineType::MySql, EngineType::PostgreSql, EngineType::Sqlite] {
            assert_eq!(
                paginate("SELECT * FROM t;", engine, PageRequest::new(1, 50)),
                "SELECT * FROM t LIMIT 50 OFFSET 0"
            );
        }
    }

    #[test]
    fn test_sql_server_adds_order_when_missing() {
        assert_eq!(
            paginate("SELECT * FROM t", EngineType::SqlServer, PageRequest::new(2, 10)),
            "SELECT * FROM t ORDER BY (SELECT NULL) OFFSET 10 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        assert_eq!(
            paginate(
                "SELECT * FROM t ORDER BY name",
                EngineType::SqlServer,
                PageRequest::new(2, 10)
            ),
            "SELECT * FROM t ORDER BY name OFFSET 10 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn test_oracle_offset_fetch() {
        assert_eq!(
            paginate("SELECT * FROM emp", EngineType::Oracle, PageRequest::new(4, 25)),
            "SELECT * FROM emp OFFSET 75 ROWS FETCH NEXT 25 ROWS ONLY"
        );
    }

    #[test]
    fn test_existing_limits_are_left_alone() {
        let statements = [
            "SELECT * FROM t LIMIT 3",
            "SELECT TOP 5 * FROM t",
            "SELECT * FROM t FETCH FIRST 2 ROWS ONLY",
        ];
        for statement in statements {
            for engine in EngineType::ALL {
                assert_eq!(paginate(statement, engine, PageRequest::default()), statement);
            }
        }
    }

    #[test]
    fn test_pagination_is_idempotent() {
        let statements = [
            "SELECT * FROM users",
            "SELECT id, name FROM users WHERE active = 1 ORDER BY id",
            "WITH x AS (SELECT 1 AS n) SELECT * FROM x;",
        ];
        for statement in statements {
            for engine in EngineType::ALL {
                for page in [PageRequest::new(1, 1), PageRequest::new(7, 33)] {
                    let once = paginate(statement, engine, page);
                    let twice = paginate(&once, engine, page);
                    assert_eq!(once, twice, "{engine}: {statement}");
                }
            }
        }
    }

    #[test]
    fn test_trailing_comments_are_dropped_before_appending() {
        assert_eq!(
            paginate("SELECT a FROM t -- trailing note", EngineType::Sqlite, PageRequest::new(1, 2)),
            "SELECT a FROM t LIMIT 2 OFFSET 0"
        );
        assert_eq!(
            paginate(
                "SELECT a FROM t /* first */ ; -- second",
                EngineType::Oracle,
                PageRequest::new(1, 2)
            ),
            "SELECT a FROM t OFFSET 0 ROWS FETCH NEXT 2 ROWS ONLY"
        );
        assert_eq!(
            count_query("SELECT a FROM t -- trailing note", EngineType::PostgreSql),
            "SELECT COUNT(*) FROM (SELECT a FROM t) AS subquery"
        );
        assert_eq!(
            paginate("SELECT '--' AS dash FROM t", EngineType::MySql, PageRequest::new(1, 2)),
            "SELECT '--' AS dash FROM t LIMIT 2 OFFSET 0"
        );
    }

    #[test]
    fn test_sql_server_ignores_nested_order_by() {
        assert_eq!(
            paginate(
                "SELECT a, ROW_NUMBER() OVER (ORDER BY a) AS rn FROM t",
                EngineType::SqlServer,
                PageRequest::new(1, 2)
            ),
            "SELECT a, ROW_NUMBER() OVER (ORDER BY a) AS rn FROM t \
             ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 2 ROWS ONLY"
        );
        assert_eq!(
            paginate(
                "SELECT name FROM t WHERE note = 'ORDER BY'",
                EngineType::SqlServer,
                PageRequest::new(1, 2)
            ),
            "SELECT name FROM t WHERE note = 'ORDER BY' \
             ORDER BY (SELECT NULL) OFFSET 0 ROWS FETCH NEXT 2 ROWS ONLY"
        );
    }

    #[test]
    fn test_count_query_alias_per_engine() {
        assert_eq!(
            count_query("SELECT * FROM emp", EngineType::Oracle),
            "SELECT COUNT(*) FROM (SELECT * FROM emp) subquery"
        );
        assert_eq!(
            count_query("  SELECT * FROM t ;; ", EngineType::Sqlite),
            "SELECT COUNT(*) FROM (SELECT * FROM t) AS subquery"
        );
    }
}
