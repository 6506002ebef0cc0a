//! Raw SQL surface over the project store.
//!
//! Executes a caller-supplied query and formats the result through the
//! adaptive truncation policy: the query text itself is classified to pick
//! the character budget, text values are cut at word boundaries, and the
//! output says when anything was truncated and how to fetch full content.

use sqlx::{Column, Row};
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::Session;
use crate::truncate::{self, Limit, TruncationDecision};

/// One executed query, formatted and truncated.
#[derive(Debug)]
pub struct QueryOutput {
    pub query_type: String,
    pub decision: TruncationDecision,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// For write statements: affected row count.
    pub rows_affected: Option<u64>,
    pub any_truncated: bool,
}

/// Execute `sql` against the store. Read queries return formatted rows;
/// anything else reports the affected row count.
pub async fn run_query(
    session: &Session,
    sql: &str,
    override_limit: Option<Limit>,
) -> Result<QueryOutput> {
    if sql.trim().is_empty() {
        return Err(Error::Validation("empty query provided".into()));
    }

    let decision = truncate::decide(sql, override_limit);
    let query_type = detect_query_type(sql);
    debug!(
        strategy = decision.strategy.as_str(),
        %query_type,
        "executing raw query"
    );

    if matches!(query_type.as_str(), "SELECT" | "PRAGMA") {
        let fetched = sqlx::query(sql).fetch_all(session.pool()).await?;

        let columns: Vec<String> = fetched
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut any_truncated = false;
        let mut rows = Vec::with_capacity(fetched.len());
        for row in &fetched {
            let mut cells = Vec::with_capacity(columns.len());
            for i in 0..row.columns().len() {
                let (cell, was_truncated) = format_cell(row, i, decision.limit);
                any_truncated |= was_truncated;
                cells.push(cell);
            }
            rows.push(cells);
        }

        Ok(QueryOutput {
            query_type,
            decision,
            columns,
            rows,
            rows_affected: None,
            any_truncated,
        })
    } else {
        let result = sqlx::query(sql).execute(session.pool()).await?;
        Ok(QueryOutput {
            query_type,
            decision,
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: Some(result.rows_affected()),
            any_truncated: false,
        })
    }
}

/// Render a query output for the CLI.
pub fn render_output(output: &QueryOutput) -> String {
    let mut out = String::new();
    let limit_display = match output.decision.limit {
        Limit::Chars(n) => format!("{} chars", n),
        Limit::Unlimited => "unlimited".to_string(),
    };
    out.push_str(&format!(
        "query: {} | strategy: {} ({})\n",
        output.query_type,
        output.decision.strategy.as_str(),
        limit_display
    ));

    if let Some(affected) = output.rows_affected {
        out.push_str(&format!("rows affected: {}\n", affected));
        return out;
    }

    if output.rows.is_empty() {
        out.push_str("no rows returned\n");
        return out;
    }

    out.push_str(&format!("rows: {}\n", output.rows.len()));
    for (i, row) in output.rows.iter().enumerate() {
        out.push_str(&format!("\nrow {}:\n", i + 1));
        for (col, cell) in output.columns.iter().zip(row) {
            out.push_str(&format!("  {}: {}\n", col, cell));
        }
    }

    if output.any_truncated {
        out.push_str(
            "\nSome values were truncated. Re-run with --no-limit, or use `mbk get` for one item's full content.\n",
        );
    }

    out
}

/// Stringify one SQLite value, truncating text values per the decision.
/// SQLite columns are dynamically typed, so decoding falls through
/// integer → float → text → blob.
fn format_cell(
    row: &sqlx::sqlite::SqliteRow,
    index: usize,
    limit: Limit,
) -> (String, bool) {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return (v.map_or("NULL".to_string(), |n| n.to_string()), false);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return (v.map_or("NULL".to_string(), |n| n.to_string()), false);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return match v {
            Some(text) => truncate::truncate_value(&text, limit),
            None => ("NULL".to_string(), false),
        };
    }
    match row.try_get::<Option<Vec<u8>>, _>(index) {
        Ok(Some(bytes)) => (format!("<{} bytes>", bytes.len()), false),
        _ => ("NULL".to_string(), false),
    }
}

fn detect_query_type(sql: &str) -> String {
    sql.trim()
        .split_whitespace()
        .next()
        .unwrap_or("UNKNOWN")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_type_detection() {
        assert_eq!(detect_query_type("select * from plans"), "SELECT");
        assert_eq!(detect_query_type("  PRAGMA table_info(x)"), "PRAGMA");
        assert_eq!(detect_query_type("UPDATE plans SET x = 1"), "UPDATE");
        assert_eq!(detect_query_type(""), "UNKNOWN");
    }
}
