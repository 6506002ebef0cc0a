//! End-to-end tests over a temporary project: sync lifecycle, search
//! ranking, truncation disclosure, schema idempotence, snapshots.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use memobank::backup::{self, SnapshotOutcome, Tier};
use memobank::config::Config;
use memobank::error::Error;
use memobank::extract::content_signature;
use memobank::models::Category;
use memobank::query;
use memobank::search;
use memobank::store::Session;
use memobank::sync;
use memobank::truncate::Limit;

fn setup_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("progress.md"),
        "# Progress\n\
         - [x] Wire up the pool\n  \
         bounded to five connections\n\
         - [ ] Add retries\n  \
         implement exponential backoff\n\
         - [ ] Write docs\n  \
         cover the sync workflow\n",
    )
    .unwrap();
    tmp
}

async fn open(tmp: &TempDir) -> Session {
    Session::initialize(tmp.path(), Config::default())
        .await
        .unwrap()
}

async fn count_by_status(session: &Session, table: &str, status: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE record_status = '{status}'");
    let output = query::run_query(session, &sql, Some(Limit::Unlimited))
        .await
        .unwrap();
    output.rows[0][0].parse().unwrap()
}

#[tokio::test]
async fn sync_creates_items_then_skips_unchanged() {
    let tmp = setup_project();
    let session = open(&tmp).await;

    let report = sync::sync_all(&session, false).await.unwrap();
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.items_new, 3);
    assert_eq!(report.files_failed, 0);

    // Second run with no file changes: mtime gate, empty outcome
    let report = sync::sync_all(&session, false).await.unwrap();
    assert_eq!(report.files_processed, 0);
    assert_eq!(report.files_skipped_unchanged, 1);
    assert_eq!(report.items_new, 0);

    session.close().await;
}

#[tokio::test]
async fn changed_item_supersedes_and_conserves_active_count() {
    let tmp = setup_project();
    let session = open(&tmp).await;
    sync::sync_all(&session, false).await.unwrap();

    // Same three keys, one context edited
    fs::write(
        tmp.path().join("progress.md"),
        "# Progress\n\
         - [x] Wire up the pool\n  \
         bounded to five connections\n\
         - [ ] Add retries\n  \
         use jittered exponential backoff\n\
         - [ ] Write docs\n  \
         cover the sync workflow\n",
    )
    .unwrap();

    let report = sync::sync_all(&session, true).await.unwrap();
    assert_eq!(report.items_updated, 1);
    assert_eq!(report.items_new, 0);
    assert_eq!(report.items_removed, 0);

    // k flips to superseded, k new actives, total active count stays N
    assert_eq!(count_by_status(&session, "discussions", "active").await, 3);
    assert_eq!(
        count_by_status(&session, "discussions", "superseded").await,
        1
    );
    assert_eq!(count_by_status(&session, "discussions", "obsolete").await, 0);

    session.close().await;
}

#[tokio::test]
async fn vanished_item_becomes_obsolete() {
    let tmp = setup_project();
    let session = open(&tmp).await;
    sync::sync_all(&session, false).await.unwrap();

    fs::write(
        tmp.path().join("progress.md"),
        "# Progress\n\
         - [x] Wire up the pool\n  \
         bounded to five connections\n\
         - [ ] Add retries\n  \
         implement exponential backoff\n",
    )
    .unwrap();

    let report = sync::sync_all(&session, true).await.unwrap();
    assert_eq!(report.items_removed, 1);
    assert_eq!(count_by_status(&session, "discussions", "active").await, 2);
    assert_eq!(count_by_status(&session, "discussions", "obsolete").await, 1);

    session.close().await;
}

#[tokio::test]
async fn formatting_only_edit_registers_no_changes() {
    let tmp = setup_project();
    let session = open(&tmp).await;
    sync::sync_all(&session, false).await.unwrap();

    // Reindent a context line; normalized content is identical
    fs::write(
        tmp.path().join("progress.md"),
        "# Progress\n\
         - [x] Wire up the pool\n      \
         bounded   to five connections\n\
         - [ ] Add retries\n  \
         implement exponential backoff\n\
         - [ ] Write docs\n  \
         cover the sync workflow\n",
    )
    .unwrap();

    let report = sync::sync_all(&session, true).await.unwrap();
    assert_eq!(report.items_new, 0);
    assert_eq!(report.items_updated, 0);
    assert_eq!(report.items_removed, 0);

    session.close().await;
}

#[tokio::test]
async fn stored_signature_round_trips() {
    let tmp = setup_project();
    let session = open(&tmp).await;
    sync::sync_all(&session, false).await.unwrap();

    let output = query::run_query(
        &session,
        "SELECT content, content_signature FROM discussions",
        Some(Limit::Unlimited),
    )
    .await
    .unwrap();

    assert!(!output.rows.is_empty());
    for row in &output.rows {
        assert_eq!(content_signature(&row[0]), row[1]);
    }

    session.close().await;
}

#[tokio::test]
async fn exact_phrase_document_ranks_first() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp).await;

    let target = session
        .save_document(
            "deploy notes",
            "The orange bicycle deployment finished. The orange bicycle rollout held.",
            "general",
            &[],
        )
        .await
        .unwrap();
    session
        .save_document(
            "long ramble",
            "An orange sunset stretched over the harbor while somewhere a lone bicycle \
             rattled across cobblestones; pages of unrelated prose follow, mentioning \
             neither topic again in any meaningful proximity or frequency at all.",
            "general",
            &[],
        )
        .await
        .unwrap();
    session
        .save_document("unrelated", "Quarterly accounting figures.", "general", &[])
        .await
        .unwrap();

    let results = search::search(&session, "orange bicycle", None, 10)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].uuid, target);

    session.close().await;
}

#[tokio::test]
async fn empty_search_query_is_a_validation_error() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp).await;
    let err = search::search(&session, "   ", None, 10).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    session.close().await;
}

#[tokio::test]
async fn truncated_search_has_full_content_escape_hatch() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp).await;

    let long_body = format!("pelican migration {}", "detail ".repeat(200));
    session
        .save_document("pelican study", &long_body, "general", &[])
        .await
        .unwrap();

    let results = search::search(&session, "pelican", None, 10).await.unwrap();
    let (rendered, _) = search::render_results(&results, "pelican", Limit::Chars(150));
    assert!(rendered.contains("pelican"));

    // The escape hatch bypasses any limit
    let item = session.find_item("pelican study", None).await.unwrap();
    assert_eq!(item.content, long_body);

    session.close().await;
}

#[tokio::test]
async fn ambiguous_natural_key_is_a_conflict() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp).await;

    session
        .save_document("release checklist", "doc body", "general", &[])
        .await
        .unwrap();
    session
        .save_plan("release checklist", "plan body", &serde_json::json!([]), "high")
        .await
        .unwrap();

    let err = session.find_item("release checklist", None).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    // Scoping to a category resolves it
    let item = session
        .find_item("release checklist", Some(Category::Plan))
        .await
        .unwrap();
    assert_eq!(item.category, Category::Plan);

    let err = session.find_item("no such key", None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    session.close().await;
}

#[tokio::test]
async fn raw_query_truncation_strategies_apply() {
    let tmp = TempDir::new().unwrap();
    let session = open(&tmp).await;

    let long_body = "word ".repeat(300);
    session
        .save_document("wordy", &long_body, "general", &[])
        .await
        .unwrap();

    let output = query::run_query(&session, "SELECT content FROM documents", None)
        .await
        .unwrap();
    assert!(output.any_truncated);
    assert_eq!(output.decision.limit, Limit::Chars(400));

    let output = query::run_query(&session, "SELECT COUNT(*) FROM documents", None)
        .await
        .unwrap();
    assert_eq!(output.decision.limit, Limit::Chars(80));
    assert_eq!(output.rows[0][0], "1");

    let output = query::run_query(
        &session,
        "SELECT content FROM documents",
        Some(Limit::Unlimited),
    )
    .await
    .unwrap();
    assert!(!output.any_truncated);
    assert_eq!(output.rows[0][0], long_body);

    session.close().await;
}

#[tokio::test]
async fn double_initialization_never_loses_rows() {
    let tmp = setup_project();
    let session = open(&tmp).await;
    sync::sync_all(&session, false).await.unwrap();
    let counts_before = session.table_counts().await.unwrap();
    session.close().await;

    // Re-initialize over the populated store
    let session = open(&tmp).await;
    let counts_after = session.table_counts().await.unwrap();

    for ((table, before), (_, after)) in counts_before.iter().zip(&counts_after) {
        // The sessions table gains one journal row per open; nothing shrinks
        assert!(
            after >= before,
            "table {} shrank from {} to {}",
            table,
            before,
            after
        );
    }

    session.close().await;
}

#[tokio::test]
async fn imported_files_are_searchable_and_change_aware() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("handbook.md"), "# Handbook\nzebra onboarding steps\n").unwrap();
    fs::write(docs.join("empty.md"), "   \n").unwrap();

    let session = open(&tmp).await;

    let report = session.import_directory(&docs).await.unwrap();
    assert_eq!(report.files_imported, 1);
    assert_eq!(report.files_skipped_empty, 1);

    // Unchanged re-import is a no-op
    let report = session.import_directory(&docs).await.unwrap();
    assert_eq!(report.files_imported, 0);
    assert_eq!(report.files_unchanged, 1);

    // Edited file updates in place
    fs::write(docs.join("handbook.md"), "# Handbook\nzebra offboarding steps\n").unwrap();
    let report = session.import_directory(&docs).await.unwrap();
    assert_eq!(report.files_updated, 1);

    let results = search::search(
        &session,
        "zebra",
        Some(&[Category::ImportedFile]),
        10,
    )
    .await
    .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].category, Category::ImportedFile);

    session.close().await;
}

#[tokio::test]
async fn snapshot_creates_verifies_and_prunes() {
    let tmp = setup_project();
    let mut config = Config::default();
    config.backup.daily_retained = 3;
    let session = Session::initialize(tmp.path(), config).await.unwrap();
    sync::sync_all(&session, false).await.unwrap();

    // Seed stale snapshots from earlier periods
    let daily_dir = backup::tier_dir(&session, Tier::Daily);
    fs::create_dir_all(&daily_dir).unwrap();
    let store_bytes = fs::read(session.store_path()).unwrap();
    for day in ["20240101", "20240102", "20240103"] {
        fs::write(
            daily_dir.join(format!("old_daily_{day}_000000.db")),
            &store_bytes,
        )
        .unwrap();
    }

    let outcome = backup::create_snapshot(&session, Tier::Daily, false)
        .await
        .unwrap();
    let path = match outcome {
        SnapshotOutcome::Created { path, .. } => path,
        other => panic!("expected a created snapshot, got {:?}", other),
    };
    assert!(path.exists());
    assert!(path.with_extension("json").exists());
    backup::verify_snapshot(&path).await.unwrap();

    // Retention 3: the real snapshot plus the two newest seeds remain, the
    // oldest seed is gone
    let remaining: Vec<String> = fs::read_dir(&daily_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".db"))
        .collect();
    assert_eq!(remaining.len(), 3);
    assert!(!remaining.iter().any(|n| n.contains("20240101")));

    // Second run in the same period is skipped, not duplicated
    let outcome = backup::create_snapshot(&session, Tier::Daily, false)
        .await
        .unwrap();
    assert!(matches!(outcome, SnapshotOutcome::SkippedExists { .. }));

    session.close().await;
}

#[tokio::test]
async fn switching_projects_flushes_and_reconnects() {
    let tmp_a = TempDir::new().unwrap();
    let tmp_b = TempDir::new().unwrap();
    fs::create_dir_all(tmp_a.path().join("a-proj")).unwrap();
    fs::create_dir_all(tmp_b.path().join("b-proj")).unwrap();
    let root_a = tmp_a.path().join("a-proj");
    let root_b = tmp_b.path().join("b-proj");

    let mut session = Session::initialize(&root_a, Config::default())
        .await
        .unwrap();
    let old_session_uuid = session.session_uuid().to_string();

    let info = session.switch_project(&root_b).await.unwrap();
    assert_eq!(info.old_project, "a-proj");
    assert_eq!(info.new_project, "b-proj");
    assert_ne!(info.new_session_uuid, old_session_uuid);
    assert_eq!(session.project().name, "b-proj");
    session.close().await;

    // The old project's journal row was completed during the flush
    let session_a = Session::open(&root_a, Config::default()).await.unwrap();
    let records = session_a.latest_sessions(10).await.unwrap();
    let old = records
        .iter()
        .find(|r| r.session_uuid == old_session_uuid)
        .unwrap();
    assert_eq!(old.status, "completed");
    session_a.close().await;
}

#[tokio::test]
async fn open_without_init_reports_not_initialized() {
    let tmp = TempDir::new().unwrap();
    let err = Session::open(tmp.path(), Config::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotInitialized));
}

#[tokio::test]
async fn sync_single_file_by_path() {
    let tmp = setup_project();
    let session = open(&tmp).await;

    let outcome = sync::synchronize_path(&session, &tmp.path().join("progress.md"), false)
        .await
        .unwrap();
    assert_eq!(outcome.new_items.len(), 3);

    let missing = sync::synchronize_path(&session, Path::new("/nope/missing.md"), false).await;
    assert!(missing.is_err());

    session.close().await;
}
