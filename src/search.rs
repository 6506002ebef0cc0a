//! Cross-category ranked full-text search.
//!
//! Each content category owns an FTS5 mirror of its primary table. A query
//! runs against every requested category's mirror, takes the top hits by
//! BM25-style rank (ascending — lower is more relevant), then merges all
//! per-category lists and re-sorts globally. Rendered output groups results
//! by category in a fixed display order; that is a presentation convenience,
//! ranking within a category is purely by relevance.

use sqlx::Row;

use crate::error::{Error, Result};
use crate::models::{Category, RankedResult};
use crate::store::Session;
use crate::truncate::{self, Limit};

/// Match markers applied by FTS5 `highlight()` / `snippet()`.
pub const MARK_OPEN: &str = ">>>";
pub const MARK_CLOSE: &str = "<<<";

/// Search the store. `categories = None` searches everything; results are
/// globally sorted by rank with a deterministic tie-break (created_at
/// descending, then uuid) and truncated to `limit`.
pub async fn search(
    session: &Session,
    query: &str,
    categories: Option<&[Category]>,
    limit: i64,
) -> Result<Vec<RankedResult>> {
    if query.trim().is_empty() {
        return Err(Error::Validation("search query must not be empty".into()));
    }
    let limit = limit.max(1);
    let candidate_k = session.config().search.candidate_k.max(limit);

    let requested: Vec<Category> = match categories {
        Some(cats) if !cats.is_empty() => cats.to_vec(),
        _ => Category::ALL.to_vec(),
    };

    let mut results = Vec::new();
    for cat in requested {
        results.extend(search_category(session, cat, query, candidate_k).await?);
    }

    Ok(merge_and_rank(results, limit as usize))
}

async fn search_category(
    session: &Session,
    category: Category,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<RankedResult>> {
    let fts = category.fts_table();
    let table = category.table();

    let sql = format!(
        r#"
        SELECT uuid, rank,
               highlight({fts}, 1, '{MARK_OPEN}', '{MARK_CLOSE}') AS title_highlight,
               snippet({fts}, 2, '{MARK_OPEN}', '{MARK_CLOSE}', '...', 32) AS snippet,
               title
        FROM {fts}
        WHERE {fts} MATCH ?
        ORDER BY rank
        LIMIT ?
        "#
    );

    let rows = sqlx::query(&sql)
        .bind(query)
        .bind(candidate_k)
        .fetch_all(session.pool())
        .await?;

    let mut results = Vec::with_capacity(rows.len());
    for row in &rows {
        let uuid: String = row.get("uuid");
        // created_at lives in the primary table, not the mirror
        let created_at: Option<i64> =
            sqlx::query_scalar(&format!("SELECT created_at FROM {table} WHERE uuid = ?"))
                .bind(&uuid)
                .fetch_optional(session.pool())
                .await?;

        results.push(RankedResult {
            category,
            uuid,
            title: row.get("title"),
            title_highlight: row.get("title_highlight"),
            snippet: row.get("snippet"),
            rank: row.get("rank"),
            created_at: created_at.unwrap_or(0),
        });
    }

    Ok(results)
}

/// Globally re-sort merged per-category hits by rank ascending; ties break
/// by created_at descending then uuid ascending, so result order is
/// deterministic.
pub fn merge_and_rank(mut results: Vec<RankedResult>, limit: usize) -> Vec<RankedResult> {
    results.sort_by(|a, b| {
        a.rank
            .partial_cmp(&b.rank)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.created_at.cmp(&a.created_at))
            .then(a.uuid.cmp(&b.uuid))
    });
    results.truncate(limit);
    results
}

/// Render results for the CLI, grouped by category in display order, with
/// snippets passed through the truncation limit. Returns the rendered text
/// and whether any value was truncated.
pub fn render_results(results: &[RankedResult], query: &str, limit: Limit) -> (String, bool) {
    let mut out = String::new();
    let mut any_truncated = false;

    if results.is_empty() {
        out.push_str("No results.\n");
        return (out, false);
    }

    out.push_str(&format!(
        "{} result{} for \"{}\"\n",
        results.len(),
        if results.len() == 1 { "" } else { "s" },
        query
    ));

    for cat in Category::ALL {
        let hits: Vec<&RankedResult> = results.iter().filter(|r| r.category == cat).collect();
        if hits.is_empty() {
            continue;
        }

        out.push_str(&format!("\n{} ({})\n", cat.label(), hits.len()));
        for hit in hits {
            let (snippet, was_truncated) = truncate::truncate_value(&hit.snippet, limit);
            any_truncated |= was_truncated;

            let date = chrono::DateTime::from_timestamp(hit.created_at, 0)
                .map(|dt| dt.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            out.push_str(&format!(
                "  [{:.2}] {}  ({})\n",
                -hit.rank, hit.title_highlight, date
            ));
            out.push_str(&format!(
                "      {}\n",
                snippet.replace('\n', " ").trim()
            ));
            out.push_str(&format!("      id: {}\n", hit.uuid));
        }
    }

    if any_truncated {
        out.push_str("\nSome content was truncated. Use `mbk get <title-or-id>` for the full text.\n");
    }

    (out, any_truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(uuid: &str, rank: f64, created_at: i64) -> RankedResult {
        RankedResult {
            category: Category::Discussion,
            uuid: uuid.to_string(),
            title: uuid.to_string(),
            title_highlight: uuid.to_string(),
            snippet: String::new(),
            rank,
            created_at,
        }
    }

    #[test]
    fn lower_rank_sorts_first() {
        let merged = merge_and_rank(
            vec![result("b", -1.0, 0), result("a", -5.0, 0), result("c", -0.2, 0)],
            10,
        );
        let order: Vec<&str> = merged.iter().map(|r| r.uuid.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn ties_break_by_recency_then_uuid() {
        let merged = merge_and_rank(
            vec![
                result("old", -1.0, 100),
                result("new", -1.0, 200),
                result("aaa", -1.0, 100),
            ],
            10,
        );
        let order: Vec<&str> = merged.iter().map(|r| r.uuid.as_str()).collect();
        assert_eq!(order, vec!["new", "aaa", "old"]);
    }

    #[test]
    fn limit_truncates_merged_results() {
        let merged = merge_and_rank(
            vec![result("a", -3.0, 0), result("b", -2.0, 0), result("c", -1.0, 0)],
            2,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].uuid, "a");
    }

    #[test]
    fn rendering_groups_by_category_display_order() {
        let mut doc = result("doc-1", -2.0, 0);
        doc.category = Category::Document;
        let mut plan = result("plan-1", -9.0, 0);
        plan.category = Category::Plan;

        // Plan ranks better globally, but documents render first
        let merged = merge_and_rank(vec![doc, plan], 10);
        assert_eq!(merged[0].uuid, "plan-1");

        let (text, _) = render_results(&merged, "q", Limit::Unlimited);
        let doc_pos = text.find("documents").unwrap();
        let plan_pos = text.find("plans").unwrap();
        assert!(doc_pos < plan_pos);
    }
}
