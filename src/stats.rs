//! Store statistics and health overview.
//!
//! Provides a quick summary of what's stored: per-category row counts,
//! lifecycle breakdown for the merge-managed tables, and store file size.
//! Used by `mbk stats` to give confidence that syncs are doing what they
//! should.

use sqlx::Row;

use crate::error::Result;
use crate::models::Category;
use crate::store::Session;

/// Lifecycle breakdown for one merge-managed table.
struct StatusStats {
    table: &'static str,
    active: i64,
    superseded: i64,
    obsolete: i64,
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(session: &Session) -> Result<()> {
    let counts = session.table_counts().await?;
    let db_size = std::fs::metadata(session.store_path())
        .map(|m| m.len())
        .unwrap_or(0);

    println!("memobank — store stats");
    println!("======================");
    println!();
    println!("  Project:  {}", session.project().name);
    println!("  Store:    {}", session.store_path().display());
    println!("  Size:     {}", format_bytes(db_size));
    println!();
    println!("  {:<18} {:>8}", "TABLE", "ROWS");
    for (table, count) in &counts {
        println!("  {:<18} {:>8}", table, count);
    }

    // Lifecycle breakdown for the versioned tables
    let mut status_stats = Vec::new();
    for cat in [Category::Discussion, Category::Artifact, Category::Document] {
        let table = cat.table();
        let row = sqlx::query(&format!(
            r#"
            SELECT
                SUM(CASE WHEN record_status = 'active' THEN 1 ELSE 0 END) AS active,
                SUM(CASE WHEN record_status = 'superseded' THEN 1 ELSE 0 END) AS superseded,
                SUM(CASE WHEN record_status = 'obsolete' THEN 1 ELSE 0 END) AS obsolete
            FROM {table}
            WHERE project_uuid = ?
            "#
        ))
        .bind(&session.project().uuid)
        .fetch_one(session.pool())
        .await?;

        status_stats.push(StatusStats {
            table,
            active: row.get::<Option<i64>, _>("active").unwrap_or(0),
            superseded: row.get::<Option<i64>, _>("superseded").unwrap_or(0),
            obsolete: row.get::<Option<i64>, _>("obsolete").unwrap_or(0),
        });
    }

    println!();
    println!(
        "  {:<18} {:>8} {:>12} {:>10}",
        "LIFECYCLE", "ACTIVE", "SUPERSEDED", "OBSOLETE"
    );
    for s in &status_stats {
        println!(
            "  {:<18} {:>8} {:>12} {:>10}",
            s.table, s.active, s.superseded, s.obsolete
        );
    }
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
