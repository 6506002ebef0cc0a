//! Tiered store snapshots with retention.
//!
//! Snapshots are whole-store copies plus a sidecar JSON metadata record
//! (row counts per core table, byte size, timestamp). Daily snapshots live
//! inside the project; weekly and monthly ones go to a centralized
//! directory shared across projects. Each tier keeps a bounded number of
//! copies — pruning removes the oldest first.
//!
//! Scheduling is not a background timer: `run_due` checks whether a
//! snapshot for the current period (day / week / month) already exists and
//! only creates one if not, so overlapping invocations never double-run.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::DATA_DIR;
use crate::db;
use crate::error::{Error, Result};
use crate::store::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Daily,
    Weekly,
    Monthly,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Daily, Tier::Weekly, Tier::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
        }
    }

    fn retained(&self, config: &crate::config::BackupConfig) -> usize {
        match self {
            Tier::Daily => config.daily_retained,
            Tier::Weekly => config.weekly_retained,
            Tier::Monthly => config.monthly_retained,
        }
    }

    /// Filename fragment identifying the current period: snapshots whose
    /// name contains it already cover this period.
    fn period_pattern(&self, now: DateTime<Utc>) -> String {
        match self {
            Tier::Daily => now.format("%Y%m%d").to_string(),
            Tier::Weekly => {
                let monday = now - Duration::days(now.weekday().num_days_from_monday() as i64);
                monday.format("%Y%m%d").to_string()
            }
            Tier::Monthly => now.format("%Y%m").to_string(),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Tier::Daily),
            "weekly" => Ok(Tier::Weekly),
            "monthly" => Ok(Tier::Monthly),
            other => Err(format!("unknown tier '{}' (daily, weekly, monthly)", other)),
        }
    }
}

/// Sidecar metadata written next to every snapshot.
#[derive(Debug, Serialize)]
pub struct SnapshotMetadata {
    pub project_name: String,
    pub project_path: String,
    pub created_at: String,
    pub tier: Tier,
    pub file_size_bytes: u64,
    pub table_counts: Vec<(String, i64)>,
}

#[derive(Debug)]
pub enum SnapshotOutcome {
    Created { path: PathBuf, size: u64 },
    SkippedExists { existing: PathBuf },
}

#[derive(Debug, Serialize)]
pub struct SnapshotEntry {
    pub tier: Tier,
    pub path: PathBuf,
    pub size: u64,
    pub modified: i64,
}

/// Directory holding one tier's snapshots for this project.
pub fn tier_dir(session: &Session, tier: Tier) -> PathBuf {
    match tier {
        Tier::Daily => session
            .project_root()
            .join(DATA_DIR)
            .join("backups")
            .join("daily"),
        Tier::Weekly | Tier::Monthly => {
            let base = session
                .config()
                .backup
                .centralized_dir
                .clone()
                .unwrap_or_else(|| {
                    dirs::home_dir()
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join(".memobank")
                        .join("backups")
                });
            base.join(&session.project().name).join(tier.as_str())
        }
    }
}

/// Create one snapshot in `tier`.
///
/// Without `force`, a snapshot already covering the current period is
/// reported as skipped. The copy is verified before it counts (open it,
/// require at least one table definition); a copy that fails verification
/// is deleted and the operation errors.
pub async fn create_snapshot(
    session: &Session,
    tier: Tier,
    force: bool,
) -> Result<SnapshotOutcome> {
    let store = session.store_path();
    if !store.exists() {
        return Err(Error::NotInitialized);
    }

    let dir = tier_dir(session, tier);
    std::fs::create_dir_all(&dir)?;

    let now = Utc::now();
    if !force {
        if let Some(existing) = existing_for_period(&dir, &tier.period_pattern(now))? {
            return Ok(SnapshotOutcome::SkippedExists { existing });
        }
    }

    let filename = format!(
        "{}_{}_{}.db",
        session.project().name,
        tier.as_str(),
        now.format("%Y%m%d_%H%M%S")
    );
    let dest = dir.join(&filename);

    // Flush the WAL into the main file so the copy carries every committed
    // transaction
    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
        .execute(session.pool())
        .await?;
    std::fs::copy(&store, &dest)?;

    if let Err(e) = verify_snapshot(&dest).await {
        let _ = std::fs::remove_file(&dest);
        return Err(e);
    }

    let size = std::fs::metadata(&dest)?.len();
    let metadata = SnapshotMetadata {
        project_name: session.project().name.clone(),
        project_path: session.project().path.clone(),
        created_at: now.to_rfc3339(),
        tier,
        file_size_bytes: size,
        table_counts: session
            .table_counts()
            .await?
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect(),
    };
    std::fs::write(
        dest.with_extension("json"),
        serde_json::to_string_pretty(&metadata)?,
    )?;

    let removed = prune_tier(&dir, tier.retained(&session.config().backup))?;
    for path in &removed {
        info!(removed = %path.display(), "pruned old snapshot");
    }

    info!(tier = tier.as_str(), path = %dest.display(), size, "snapshot created");
    Ok(SnapshotOutcome::Created { path: dest, size })
}

/// Run every tier whose period has elapsed. Idempotent and re-entrant: a
/// period that already has a snapshot is left alone.
pub async fn run_due(session: &Session) -> Result<Vec<(Tier, SnapshotOutcome)>> {
    let mut outcomes = Vec::new();
    for tier in Tier::ALL {
        let outcome = create_snapshot(session, tier, false).await?;
        outcomes.push((tier, outcome));
    }
    Ok(outcomes)
}

/// Integrity check: the copy must open as SQLite and expose at least one
/// table definition.
pub async fn verify_snapshot(path: &Path) -> Result<()> {
    let pool = db::connect_read_only(path)
        .await
        .map_err(|e| Error::Integrity(format!("snapshot does not open: {}", e)))?;
    let table_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
            .fetch_one(&pool)
            .await
            .map_err(|e| Error::Integrity(format!("snapshot unreadable: {}", e)))?;
    pool.close().await;

    if table_count == 0 {
        return Err(Error::Integrity(
            "snapshot contains no table definitions".into(),
        ));
    }
    Ok(())
}

/// All snapshots across tiers, newest first within each tier.
pub fn list_snapshots(session: &Session) -> Result<Vec<SnapshotEntry>> {
    let mut entries = Vec::new();
    for tier in Tier::ALL {
        let dir = tier_dir(session, tier);
        if !dir.exists() {
            continue;
        }
        let mut tier_entries: Vec<SnapshotEntry> = snapshot_files(&dir)?
            .into_iter()
            .map(|(path, modified, size)| SnapshotEntry {
                tier,
                path,
                size,
                modified,
            })
            .collect();
        tier_entries.sort_by(|a, b| b.modified.cmp(&a.modified));
        entries.extend(tier_entries);
    }
    Ok(entries)
}

/// Verify every snapshot; returns `(verified, failed)` counts.
pub async fn verify_all(session: &Session) -> Result<(usize, usize)> {
    let mut verified = 0;
    let mut failed = 0;
    for entry in list_snapshots(session)? {
        match verify_snapshot(&entry.path).await {
            Ok(()) => verified += 1,
            Err(e) => {
                warn!(path = %entry.path.display(), "snapshot failed verification: {}", e);
                failed += 1;
            }
        }
    }
    Ok((verified, failed))
}

fn existing_for_period(dir: &Path, pattern: &str) -> Result<Option<PathBuf>> {
    for (path, _, _) in snapshot_files(dir)? {
        if path
            .file_name()
            .map(|n| n.to_string_lossy().contains(pattern))
            .unwrap_or(false)
        {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Remove snapshots beyond `retain`, oldest first, along with their
/// sidecar metadata. Returns the removed paths.
pub fn prune_tier(dir: &Path, retain: usize) -> Result<Vec<PathBuf>> {
    let mut files = snapshot_files(dir)?;
    // Newest first; name breaks mtime ties since it embeds the timestamp
    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let mut removed = Vec::new();
    for (path, _, _) in files.into_iter().skip(retain) {
        std::fs::remove_file(&path)?;
        let sidecar = path.with_extension("json");
        if sidecar.exists() {
            let _ = std::fs::remove_file(&sidecar);
        }
        removed.push(path);
    }
    Ok(removed)
}

/// `.db` files in a tier directory with mtime (nanos) and size.
fn snapshot_files(dir: &Path) -> Result<Vec<(PathBuf, i64, u64)>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("db") {
            continue;
        }
        let metadata = entry.metadata()?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        files.push((path, modified, metadata.len()));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_keeps_newest_n_and_removes_oldest() {
        let tmp = tempfile::tempdir().unwrap();
        let names = [
            "proj_daily_20250101_000000.db",
            "proj_daily_20250102_000000.db",
            "proj_daily_20250103_000000.db",
        ];
        for name in names {
            std::fs::write(tmp.path().join(name), b"snapshot").unwrap();
            std::fs::write(
                tmp.path().join(name).with_extension("json"),
                b"{}",
            )
            .unwrap();
        }

        let removed = prune_tier(tmp.path(), 2).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(removed[0]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("20250101"));
        assert!(!tmp.path().join(names[0]).exists());
        assert!(!tmp.path().join(names[0]).with_extension("json").exists());
        assert!(tmp.path().join(names[1]).exists());
        assert!(tmp.path().join(names[2]).exists());
    }

    #[test]
    fn prune_is_noop_within_budget() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("proj_daily_20250101_000000.db"), b"x").unwrap();
        let removed = prune_tier(tmp.path(), 7).unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn period_patterns_match_their_granularity() {
        let now = DateTime::parse_from_rfc3339("2025-07-16T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(Tier::Daily.period_pattern(now), "20250716");
        // 2025-07-16 is a Wednesday; the week anchors to Monday the 14th
        assert_eq!(Tier::Weekly.period_pattern(now), "20250714");
        assert_eq!(Tier::Monthly.period_pattern(now), "202507");
    }

    #[test]
    fn existing_for_period_detects_coverage() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("proj_daily_20250716_081500.db"), b"x").unwrap();
        assert!(existing_for_period(tmp.path(), "20250716")
            .unwrap()
            .is_some());
        assert!(existing_for_period(tmp.path(), "20250717")
            .unwrap()
            .is_none());
    }
}
