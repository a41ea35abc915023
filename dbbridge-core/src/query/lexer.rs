//! Minimal lexical scan telling SQL code apart from quoted text and comments.
//!
//! Quoted spans cover `'…'`, `"…"`, `` `…` `` and `[…]`, with a doubled
//! closing character read as an escape. Comments are `--` to end of line and
//! `/* … */`. Unterminated spans run to the end of the text.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpanKind {
    Code,
    Quoted,
    Comment,
}

/// Splits `sql` into consecutive code, quoted and comment spans.
pub(crate) fn spans(sql: &str) -> Vec<(SpanKind, Range<usize>)> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut code_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let next = bytes.get(i.saturating_add(1)).copied();
        let special = match (bytes[i], next) {
            (b'-', Some(b'-')) => Some((SpanKind::Comment, line_comment_end(sql, i))),
            (b'/', Some(b'*')) => Some((SpanKind::Comment, block_comment_end(sql, i))),
            (b'\'', _) => Some((SpanKind::Quoted, quoted_end(bytes, i, b'\''))),
            (b'"', _) => Some((SpanKind::Quoted, quoted_end(bytes, i, b'"'))),
            (b'`', _) => Some((SpanKind::Quoted, quoted_end(bytes, i, b'`'))),
            (b'[', _) => Some((SpanKind::Quoted, quoted_end(bytes, i, b']'))),
            _ => None,
        };

        match special {
            Some((kind, end)) => {
                if code_start < i {
                    out.push((SpanKind::Code, code_start..i));
                }
                out.push((kind, i..end));
                i = end;
                code_start = end;
            }
            None => i = i.saturating_add(1),
        }
    }

    if code_start < bytes.len() {
        out.push((SpanKind::Code, code_start..bytes.len()));
    }
    out
}

fn line_comment_end(sql: &str, start: usize) -> usize {
    sql[start..]
        .find('\n')
        .map_or(sql.len(), |n| start.saturating_add(n))
}

fn block_comment_end(sql: &str, start: usize) -> usize {
    let body = start.saturating_add(2);
    sql[body..]
        .find("*/")
        .map_or(sql.len(), |n| body.saturating_add(n).saturating_add(2))
}

fn quoted_end(bytes: &[u8], open: usize, close: u8) -> usize {
    let mut i = open.saturating_add(1);
    while i < bytes.len() {
        if bytes[i] == close {
            if bytes.get(i.saturating_add(1)) == Some(&close) {
                i = i.saturating_add(2);
                continue;
            }
            return i.saturating_add(1);
        }
        i = i.saturating_add(1);
    }
    bytes.len()
}

/// Drops comments (and the whitespace around them) from the end of `sql`.
pub(crate) fn strip_trailing_comments(sql: &str) -> &str {
    let end = spans(sql)
        .into_iter()
        .filter_map(|(kind, range)| match kind {
            SpanKind::Comment => None,
            SpanKind::Quoted => Some(range.end),
            SpanKind::Code => {
                let text = &sql[range.clone()];
                let kept = text.trim_end().len();
                (kept > 0).then(|| range.start.saturating_add(kept))
            }
        })
        .max()
        .unwrap_or(0);
    &sql[..end]
}

/// The code of `sql` with quoted text and comments blanked out.
///
/// With `top_level_only`, everything inside parentheses is blanked as well,
/// so a match against the result only sees clauses of the outermost query.
pub(crate) fn blank_non_code(sql: &str, top_level_only: bool) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut depth = 0_usize;

    for (kind, range) in spans(sql) {
        if kind != SpanKind::Code {
            out.push(' ');
            continue;
        }
        for c in sql[range].chars() {
            if !top_level_only {
                out.push(c);
                continue;
            }
            match c {
                '(' => {
                    depth = depth.saturating_add(1);
                    out.push(' ');
                }
                ')' => {
                    depth = depth.saturating_sub(1);
                    out.push(' ');
                }
                _ if depth == 0 => out.push(c),
                _ => out.push(' '),
            }
        }
    }
    out
}
