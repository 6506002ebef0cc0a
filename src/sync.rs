//! Change detection and synchronization ("smart merge").
//!
//! Compares items freshly extracted from a source file against the active
//! items previously stored for that file and issues the minimal set of
//! never-destructive mutations: new items are inserted active, changed items
//! supersede their predecessor, vanished items become obsolete. All flips
//! and inserts for one file commit as a single transaction.
//!
//! Obsolescence is computed only relative to the content of files that are
//! still read; a file deleted from disk is not swept.

use std::collections::HashMap;
use std::path::Path;

use chrono::{TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::discover::{self, DiscoveredFile};
use crate::error::Result;
use crate::extract;
use crate::models::{
    CandidateItem, FileSyncDetail, FileSyncStatus, ItemKind, MergeOutcome, RecordStatus,
    StoredItem, SyncBatchReport,
};
use crate::store::{Session, SourceFileMeta};

/// Synchronize one source file into the store.
///
/// Unless `force` is set, a file whose mtime is not newer than the greatest
/// mtime recorded across its active and superseded items returns an empty
/// outcome without reading content or writing anything — repeated runs over
/// an unchanged tree stay cheap.
pub async fn synchronize(
    session: &Session,
    file: &DiscoveredFile,
    force: bool,
) -> Result<MergeOutcome> {
    if !force {
        if let Some(last) = session.last_synced_modified(&file.relative_path).await? {
            if file.modified.timestamp() <= last {
                debug!(file = %file.relative_path, "unchanged since last sync, skipping");
                return Ok(MergeOutcome::default());
            }
        }
    }

    let content = discover::read_text(&file.path)?;
    let current = extract::extract_items(&file.relative_path, &content);
    let existing = session.active_items_for_file(&file.relative_path).await?;

    let outcome = diff_items(current, existing, &file.relative_path);
    for warning in &outcome.warnings {
        warn!(file = %file.relative_path, "{}", warning);
    }

    if !outcome.is_empty() {
        commit_outcome(session, file, &outcome).await?;
        info!(
            file = %file.relative_path,
            new = outcome.new_items.len(),
            updated = outcome.updated_items.len(),
            removed = outcome.removed_items.len(),
            "file synchronized"
        );
    }

    Ok(outcome)
}

/// Synchronize a single file given by path (CLI entry point).
pub async fn synchronize_path(
    session: &Session,
    path: &Path,
    force: bool,
) -> Result<MergeOutcome> {
    let metadata = std::fs::metadata(path)?;
    let relative = path
        .strip_prefix(session.project_root())
        .unwrap_or(path)
        .to_string_lossy()
        .to_string();

    let file = DiscoveredFile {
        path: path.to_path_buf(),
        relative_path: relative,
        modified: system_time_utc(metadata.modified().ok()),
        created: system_time_utc(metadata.created().ok()),
        size: metadata.len(),
    };
    synchronize(session, &file, force).await
}

/// Synchronize every matching file under the project root.
///
/// Partial-failure tolerant: a parse or commit error on one file is
/// recorded in the report and does not abort the remaining files;
/// already-committed files stay committed.
pub async fn sync_all(session: &Session, force: bool) -> Result<SyncBatchReport> {
    let walked = discover::walk(session.project_root(), &session.config().discovery)?;
    let mut report = SyncBatchReport::default();

    for file in &walked.files {
        match synchronize(session, file, force).await {
            Ok(outcome) if outcome.is_empty() => {
                report.files_skipped_unchanged += 1;
                report.details.push(FileSyncDetail {
                    path: file.relative_path.clone(),
                    status: FileSyncStatus::SkippedUnchanged,
                    items_new: 0,
                    items_updated: 0,
                    items_removed: 0,
                });
            }
            Ok(outcome) => {
                report.files_processed += 1;
                report.items_new += outcome.new_items.len();
                report.items_updated += outcome.updated_items.len();
                report.items_removed += outcome.removed_items.len();
                report.warnings.extend(outcome.warnings.iter().cloned());
                report.details.push(FileSyncDetail {
                    path: file.relative_path.clone(),
                    status: FileSyncStatus::Synced,
                    items_new: outcome.new_items.len(),
                    items_updated: outcome.updated_items.len(),
                    items_removed: outcome.removed_items.len(),
                });
            }
            Err(e) => {
                report.files_failed += 1;
                report
                    .errors
                    .push(format!("{}: {}", file.relative_path, e));
                report.details.push(FileSyncDetail {
                    path: file.relative_path.clone(),
                    status: FileSyncStatus::Failed,
                    items_new: 0,
                    items_updated: 0,
                    items_removed: 0,
                });
            }
        }
    }

    info!(
        processed = report.files_processed,
        skipped = report.files_skipped_unchanged,
        failed = report.files_failed,
        "sync run finished"
    );
    Ok(report)
}

/// Partition freshly extracted items against stored active items by
/// `(kind, natural key)`.
///
/// - key only in current → new
/// - key in both, signatures differ → updated (old superseded, new inserted)
/// - key in both, signatures equal → no-op
/// - key only in existing → removed (obsolete)
///
/// Two candidates sharing a natural key within one file: the last
/// occurrence wins; the dropped one is surfaced as a warning.
pub fn diff_items(
    current: Vec<CandidateItem>,
    existing: Vec<StoredItem>,
    file_label: &str,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    let mut current_by_key: HashMap<(ItemKind, String), CandidateItem> = HashMap::new();
    for item in current {
        let key = (item.kind, item.natural_key.clone());
        if let Some(dropped) = current_by_key.insert(key, item) {
            outcome.warnings.push(format!(
                "duplicate natural key '{}' in {}; keeping the last occurrence",
                dropped.natural_key, file_label
            ));
        }
    }

    let existing_by_key: HashMap<(ItemKind, String), StoredItem> = existing
        .into_iter()
        .map(|item| ((item.kind, item.natural_key.clone()), item))
        .collect();

    let mut new_items: Vec<CandidateItem> = Vec::new();
    let mut updated: Vec<(CandidateItem, String)> = Vec::new();
    for (key, item) in &current_by_key {
        match existing_by_key.get(key) {
            None => new_items.push(item.clone()),
            Some(prev) if prev.content_signature != item.signature => {
                updated.push((item.clone(), prev.uuid.clone()));
            }
            Some(_) => {}
        }
    }

    let mut removed: Vec<StoredItem> = existing_by_key
        .into_iter()
        .filter(|(key, _)| !current_by_key.contains_key(key))
        .map(|(_, item)| item)
        .collect();

    // Deterministic ordering for reports and tests
    new_items.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));
    updated.sort_by(|a, b| a.0.natural_key.cmp(&b.0.natural_key));
    removed.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));

    outcome.new_items = new_items;
    outcome.updated_items = updated;
    outcome.removed_items = removed;
    outcome
}

/// Apply one file's outcome as a single atomic unit. A failure partway
/// rolls everything back, so an item is never left superseded without its
/// replacement present.
async fn commit_outcome(
    session: &Session,
    file: &DiscoveredFile,
    outcome: &MergeOutcome,
) -> Result<()> {
    let now = Utc::now().timestamp();
    let source = SourceFileMeta {
        path: file.relative_path.clone(),
        created: file.created.timestamp(),
        modified: file.modified.timestamp(),
    };

    let mut tx = session.pool().begin().await?;

    for item in &outcome.new_items {
        session.insert_candidate(&mut tx, item, &source, now).await?;
    }
    for (item, prev_uuid) in &outcome.updated_items {
        session
            .flip_status(&mut tx, item.kind, prev_uuid, RecordStatus::Superseded, now)
            .await?;
        session.insert_candidate(&mut tx, item, &source, now).await?;
    }
    for item in &outcome.removed_items {
        session
            .flip_status(&mut tx, item.kind, &item.uuid, RecordStatus::Obsolete, now)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

fn system_time_utc(time: Option<std::time::SystemTime>) -> chrono::DateTime<Utc> {
    let secs = time
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    Utc.timestamp_opt(secs, 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::content_signature;

    fn candidate(key: &str, content: &str) -> CandidateItem {
        CandidateItem {
            kind: ItemKind::Discussion,
            natural_key: key.to_string(),
            content: content.to_string(),
            tags: Vec::new(),
            implemented: None,
            signature: content_signature(content),
        }
    }

    fn stored(key: &str, content: &str, uuid: &str) -> StoredItem {
        StoredItem {
            kind: ItemKind::Discussion,
            uuid: uuid.to_string(),
            natural_key: key.to_string(),
            content_signature: content_signature(content),
        }
    }

    #[test]
    fn partitions_new_updated_unchanged_removed() {
        let current = vec![
            candidate("alpha", "same content"),
            candidate("beta", "edited content"),
            candidate("gamma", "brand new"),
        ];
        let existing = vec![
            stored("alpha", "same content", "u-alpha"),
            stored("beta", "original content", "u-beta"),
            stored("delta", "vanished", "u-delta"),
        ];

        let outcome = diff_items(current, existing, "notes.md");

        assert_eq!(outcome.new_items.len(), 1);
        assert_eq!(outcome.new_items[0].natural_key, "gamma");
        assert_eq!(outcome.updated_items.len(), 1);
        assert_eq!(outcome.updated_items[0].0.natural_key, "beta");
        assert_eq!(outcome.updated_items[0].1, "u-beta");
        assert_eq!(outcome.removed_items.len(), 1);
        assert_eq!(outcome.removed_items[0].natural_key, "delta");
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn unchanged_signatures_are_noops() {
        let current = vec![candidate("alpha", "stable")];
        let existing = vec![stored("alpha", "stable", "u1")];
        let outcome = diff_items(current, existing, "f.md");
        assert!(outcome.is_empty());
    }

    #[test]
    fn formatting_only_edit_is_a_noop() {
        let current = vec![candidate("alpha", "line one\n  line   two")];
        let existing = vec![stored("alpha", "line one line two", "u1")];
        let outcome = diff_items(current, existing, "f.md");
        assert!(outcome.is_empty());
    }

    #[test]
    fn duplicate_key_last_occurrence_wins() {
        let current = vec![
            candidate("alpha", "first occurrence"),
            candidate("alpha", "second occurrence"),
        ];
        let outcome = diff_items(current, Vec::new(), "f.md");
        assert_eq!(outcome.new_items.len(), 1);
        assert_eq!(outcome.new_items[0].content, "second occurrence");
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("duplicate natural key"));
    }

    #[test]
    fn same_key_different_kind_do_not_collide() {
        let mut artifact = candidate("alpha", "artifact body");
        artifact.kind = ItemKind::Artifact;
        let current = vec![candidate("alpha", "discussion body"), artifact];
        let outcome = diff_items(current, Vec::new(), "f.md");
        assert_eq!(outcome.new_items.len(), 2);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn conservation_k_changed_of_n() {
        // N = 4 active items, exactly k = 2 with changed content
        let current = vec![
            candidate("a", "unchanged a"),
            candidate("b", "CHANGED b"),
            candidate("c", "unchanged c"),
            candidate("d", "CHANGED d"),
        ];
        let existing = vec![
            stored("a", "unchanged a", "ua"),
            stored("b", "old b", "ub"),
            stored("c", "unchanged c", "uc"),
            stored("d", "old d", "ud"),
        ];

        let outcome = diff_items(current, existing, "f.md");
        assert_eq!(outcome.updated_items.len(), 2);
        assert_eq!(outcome.new_items.len(), 0);
        assert_eq!(outcome.removed_items.len(), 0);
    }
}
