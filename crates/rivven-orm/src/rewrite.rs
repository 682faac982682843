//! Statement text rewriting for SQL Server
//!
//! sea-query has no SQL Server backend, so SQL Server statements are rendered
//! by the PostgreSQL backend and patched here:
//!
//! | Rewrite | Anchor | Spliced after the anchor |
//! |---------|--------|--------------------------|
//! | [`lock_hint`] | `FROM "table"` | ` WITH (XLOCK, ROWLOCK)` |
//! | [`output_identity`] | `INSERT INTO "table" [(...)]` | ` OUTPUT INSERTED."id"` |
//! | [`numbered_placeholders`] | `$n` | replaced by `@Pn` |
//! | [`boolean_predicates`] | `TRUE` / `FALSE` | replaced by `1 = 1` / `1 = 0` |
//! | [`paginate`] | end of statement | `OFFSET n ROWS FETCH NEXT m ROWS ONLY` |
//!
//! The anchors depend on the PostgreSQL backend's double-quoted identifiers.
//! When an anchor is missing the statement is returned unchanged and a
//! warning is logged; debug builds also fail an assertion.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::warn;

static FROM_TABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"FROM\s+"[^"]+""#).unwrap());

static INSERT_COLUMNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"INSERT INTO\s+"[^"]+"(?:\s*\([^)]*\))?"#).unwrap());

static DOLLAR_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(\d+)").unwrap());

static BOOLEAN_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?:[^"]|"")*"|\bTRUE\b|\bFALSE\b"#).unwrap());

const LOCK_HINT: &str = " WITH (XLOCK, ROWLOCK)";

/// Insert `splice` right after the first match of `anchor`
fn splice_after(anchor: &Regex, sql: &str, splice: &str) -> Option<String> {
    let end = anchor.find(sql)?.end();
    let mut out = String::with_capacity(sql.len() + splice.len());
    out.push_str(&sql[..end]);
    out.push_str(splice);
    out.push_str(&sql[end..]);
    Some(out)
}

fn or_unchanged(rewritten: Option<String>, sql: &str, rewrite: &str) -> String {
    match rewritten {
        Some(out) => out,
        None => {
            warn!(rewrite, sql, "statement rewrite anchor not found, sending statement unchanged");
            debug_assert!(false, "{} anchor not found in: {}", rewrite, sql);
            sql.to_string()
        }
    }
}

/// Splice the exclusive row-lock hint after `FROM "table"`, or `None`
pub fn try_lock_hint(sql: &str) -> Option<String> {
    splice_after(&FROM_TABLE, sql, LOCK_HINT)
}

/// Splice the exclusive row-lock hint after `FROM "table"`
pub fn lock_hint(sql: &str) -> String {
    or_unchanged(try_lock_hint(sql), sql, "lock hint")
}

/// Splice `OUTPUT INSERTED."column"` after the insert's column list (or
/// table, for `DEFAULT VALUES`), or `None`
pub fn try_output_identity(sql: &str, column: &str) -> Option<String> {
    let splice = format!(" OUTPUT INSERTED.\"{}\"", column.replace('"', "\"\""));
    splice_after(&INSERT_COLUMNS, sql, &splice)
}

/// Splice `OUTPUT INSERTED."column"` after the insert's column list
pub fn output_identity(sql: &str, column: &str) -> String {
    or_unchanged(try_output_identity(sql, column), sql, "output clause")
}

/// Rename `$n` placeholders to `@Pn`
pub fn numbered_placeholders(sql: &str) -> String {
    DOLLAR_PLACEHOLDER.replace_all(sql, "@P${1}").into_owned()
}

/// Replace bare `TRUE` / `FALSE` predicates with `1 = 1` / `1 = 0`.
///
/// T-SQL has no boolean literal; empty conditions render as `WHERE TRUE`
/// (all) or `WHERE FALSE` (any). Quoted identifiers are left alone and
/// values are always bound, so no other occurrence can be hit.
pub fn boolean_predicates(sql: &str) -> String {
    BOOLEAN_LITERAL
        .replace_all(sql, |caps: &Captures| match &caps[0] {
            "TRUE" => "1 = 1".to_string(),
            "FALSE" => "1 = 0".to_string(),
            quoted => quoted.to_string(),
        })
        .into_owned()
}

/// Append `OFFSET .. ROWS [FETCH NEXT .. ROWS ONLY]`.
///
/// OFFSET/FETCH is only legal after ORDER BY, so an unordered statement gets
/// `ORDER BY (SELECT NULL)` first. Without limit and offset the statement is
/// returned as is.
pub fn paginate(sql: &str, ordered: bool, limit: Option<u64>, offset: Option<u64>) -> String {
    if limit.is_none() && offset.is_none() {
        return sql.to_string();
    }

    let mut out = sql.to_string();
    if !ordered {
        out.push_str(" ORDER BY (SELECT NULL)");
    }
    out.push_str(&format!(" OFFSET {} ROWS", offset.unwrap_or(0)));
    if let Some(limit) = limit {
        out.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
    }
    out
}
