//! The `Session` context object and all store persistence.
//!
//! A `Session` owns the single active connection pool for one project store
//! and is passed by reference into every operation — there is no ambient
//! global state. Every write to a primary table updates that category's FTS
//! mirror inside the same transaction, so the search index never lags a
//! committed write.

use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{self, Config};
use crate::db;
use crate::discover;
use crate::error::{Error, Result};
use crate::extract::content_signature;
use crate::models::{
    CandidateItem, Category, ImportReport, ItemKind, RecordStatus, ResyncReport, StoredItem,
};
use crate::schema::{self, ProjectIdentity};
use crate::session;

/// Source file metadata attached to items created during a sync pass.
#[derive(Debug, Clone)]
pub struct SourceFileMeta {
    pub path: String,
    pub created: i64,
    pub modified: i64,
}

/// One fully resolved item, as returned by lookups.
#[derive(Debug, Clone)]
pub struct ItemDetail {
    pub category: Category,
    pub uuid: String,
    pub title: String,
    pub content: String,
    pub status: Option<String>,
    pub created_at: i64,
    pub source_file: Option<String>,
}

/// The per-project context: pool, project identity, configuration and the
/// journal row for this session.
#[derive(Debug)]
pub struct Session {
    pool: SqlitePool,
    project: ProjectIdentity,
    config: Config,
    project_root: PathBuf,
    session_uuid: String,
}

impl Session {
    /// Create the store if needed and open a session. Used by `mbk init`
    /// and by tests; everything is idempotent.
    pub async fn initialize(project_root: &Path, config: Config) -> Result<Session> {
        let store = config::store_path(project_root);
        let pool = db::connect(&store).await?;
        let project = schema::initialize(&pool, project_root).await?;
        schema::verify_core_tables(&pool).await?;
        let session_uuid = session::open_session_row(&pool, &project).await?;
        info!(project = %project.name, session = %session_uuid, "session opened");
        Ok(Session {
            pool,
            project,
            config,
            project_root: project_root.to_path_buf(),
            session_uuid,
        })
    }

    /// Open an existing store. Fails with `NotInitialized` when the store
    /// file is absent; schema initialization still runs (idempotent, and it
    /// repairs drift on stores created by older versions).
    pub async fn open(project_root: &Path, config: Config) -> Result<Session> {
        if !config::store_path(project_root).exists() {
            return Err(Error::NotInitialized);
        }
        Self::initialize(project_root, config).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn project(&self) -> &ProjectIdentity {
        &self.project
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn store_path(&self) -> PathBuf {
        config::store_path(&self.project_root)
    }

    pub fn session_uuid(&self) -> &str {
        &self.session_uuid
    }

    pub(crate) fn replace_connection(
        &mut self,
        pool: SqlitePool,
        project: ProjectIdentity,
        config: Config,
        project_root: PathBuf,
        session_uuid: String,
    ) {
        self.pool = pool;
        self.project = project;
        self.config = config;
        self.project_root = project_root;
        self.session_uuid = session_uuid;
    }

    // ============ merge-managed items (discussions, artifacts) ============

    /// Greatest source-file mtime recorded across this file's active and
    /// superseded items. `None` when the file was never synced.
    pub async fn last_synced_modified(&self, source_file: &str) -> Result<Option<i64>> {
        let max: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(source_file_modified) FROM (
                SELECT source_file_modified FROM discussions
                WHERE source_file = ? AND project_uuid = ?
                  AND record_status IN ('active', 'superseded')
                UNION ALL
                SELECT source_file_modified FROM artifacts
                WHERE source_file = ? AND project_uuid = ?
                  AND record_status IN ('active', 'superseded')
            )
            "#,
        )
        .bind(source_file)
        .bind(&self.project.uuid)
        .bind(source_file)
        .bind(&self.project.uuid)
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    /// Active items previously extracted from one source file, both kinds.
    pub async fn active_items_for_file(&self, source_file: &str) -> Result<Vec<StoredItem>> {
        let mut items = Vec::new();

        let rows = sqlx::query(
            r#"
            SELECT uuid, summary, content_signature FROM discussions
            WHERE source_file = ? AND project_uuid = ? AND record_status = 'active'
            ORDER BY created_at
            "#,
        )
        .bind(source_file)
        .bind(&self.project.uuid)
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            items.push(StoredItem {
                kind: ItemKind::Discussion,
                uuid: row.get("uuid"),
                natural_key: row.get("summary"),
                content_signature: row
                    .get::<Option<String>, _>("content_signature")
                    .unwrap_or_default(),
            });
        }

        let rows = sqlx::query(
            r#"
            SELECT uuid, title, content_signature FROM artifacts
            WHERE source_file = ? AND project_uuid = ? AND record_status = 'active'
            ORDER BY created_at
            "#,
        )
        .bind(source_file)
        .bind(&self.project.uuid)
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            items.push(StoredItem {
                kind: ItemKind::Artifact,
                uuid: row.get("uuid"),
                natural_key: row.get("title"),
                content_signature: row
                    .get::<Option<String>, _>("content_signature")
                    .unwrap_or_default(),
            });
        }

        Ok(items)
    }

    /// Insert one extracted item as a new active record, mirroring it into
    /// the category's FTS table. Runs inside the caller's transaction.
    pub(crate) async fn insert_candidate(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        item: &CandidateItem,
        source: &SourceFileMeta,
        now: i64,
    ) -> Result<String> {
        let uuid = Uuid::new_v4().to_string();
        let tags = serde_json::to_string(&item.tags)?;

        match item.kind {
            ItemKind::Discussion => {
                sqlx::query(
                    r#"
                    INSERT INTO discussions
                        (uuid, project_uuid, summary, content, implemented, tags,
                         created_at, updated_at, source_file, source_file_created,
                         source_file_modified, record_status, content_signature)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)
                    "#,
                )
                .bind(&uuid)
                .bind(&self.project.uuid)
                .bind(&item.natural_key)
                .bind(&item.content)
                .bind(item.implemented)
                .bind(&tags)
                .bind(now)
                .bind(now)
                .bind(&source.path)
                .bind(source.created)
                .bind(source.modified)
                .bind(&item.signature)
                .execute(&mut **tx)
                .await?;
            }
            ItemKind::Artifact => {
                sqlx::query(
                    r#"
                    INSERT INTO artifacts
                        (uuid, project_uuid, title, content, artifact_type, filename, tags,
                         created_at, updated_at, source_file, source_file_created,
                         source_file_modified, record_status, content_signature)
                    VALUES (?, ?, ?, ?, 'pattern', ?, ?, ?, ?, ?, ?, ?, 'active', ?)
                    "#,
                )
                .bind(&uuid)
                .bind(&self.project.uuid)
                .bind(&item.natural_key)
                .bind(&item.content)
                .bind(&source.path)
                .bind(&tags)
                .bind(now)
                .bind(now)
                .bind(&source.path)
                .bind(source.created)
                .bind(source.modified)
                .bind(&item.signature)
                .execute(&mut **tx)
                .await?;
            }
        }

        let fts = item.kind.category().fts_table();
        sqlx::query(&format!(
            "INSERT INTO {fts} (uuid, title, content) VALUES (?, ?, ?)"
        ))
        .bind(&uuid)
        .bind(&item.natural_key)
        .bind(&item.content)
        .execute(&mut **tx)
        .await?;

        Ok(uuid)
    }

    /// Flip one item to a terminal status and drop it from the FTS mirror.
    /// Runs inside the caller's transaction.
    pub(crate) async fn flip_status(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        kind: ItemKind,
        uuid: &str,
        status: RecordStatus,
        now: i64,
    ) -> Result<()> {
        debug_assert!(status != RecordStatus::Active, "flips are terminal only");
        let table = kind.category().table();
        sqlx::query(&format!(
            "UPDATE {table} SET record_status = ?, updated_at = ? WHERE uuid = ? AND project_uuid = ?"
        ))
        .bind(status.as_str())
        .bind(now)
        .bind(uuid)
        .bind(&self.project.uuid)
        .execute(&mut **tx)
        .await?;

        let fts = kind.category().fts_table();
        sqlx::query(&format!("DELETE FROM {fts} WHERE uuid = ?"))
            .bind(uuid)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    // ============ explicit save operations ============

    pub async fn save_document(
        &self,
        title: &str,
        content: &str,
        doc_type: &str,
        tags: &[String],
    ) -> Result<String> {
        if title.trim().is_empty() {
            return Err(Error::Validation("document title must not be empty".into()));
        }
        let uuid = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents
                (uuid, project_uuid, title, content, doc_type, tags, created_at, updated_at,
                 record_status, content_signature)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active', ?)
            "#,
        )
        .bind(&uuid)
        .bind(&self.project.uuid)
        .bind(title)
        .bind(content)
        .bind(doc_type)
        .bind(serde_json::to_string(tags)?)
        .bind(now)
        .bind(now)
        .bind(content_signature(content))
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO documents_fts (uuid, title, content) VALUES (?, ?, ?)")
            .bind(&uuid)
            .bind(title)
            .bind(content)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(%uuid, title, "document saved");
        Ok(uuid)
    }

    /// Record a code snapshot. Version numbers count up per filename.
    pub async fn save_code_snapshot(
        &self,
        filename: &str,
        content: &str,
        description: &str,
    ) -> Result<String> {
        let uuid = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let prev_version: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version_number) FROM code_snapshots WHERE filename = ? AND project_uuid = ?",
        )
        .bind(filename)
        .bind(&self.project.uuid)
        .fetch_one(&mut *tx)
        .await?;
        let version = prev_version.unwrap_or(0) + 1;

        sqlx::query(
            r#"
            INSERT INTO code_snapshots
                (uuid, project_uuid, filename, content, version_number, description, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&uuid)
        .bind(&self.project.uuid)
        .bind(filename)
        .bind(content)
        .bind(version)
        .bind(description)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO code_snapshots_fts (uuid, title, content) VALUES (?, ?, ?)")
            .bind(&uuid)
            .bind(filename)
            .bind(content)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(%uuid, filename, version, "code snapshot saved");
        Ok(uuid)
    }

    pub async fn save_plan(
        &self,
        title: &str,
        description: &str,
        phases: &serde_json::Value,
        priority: &str,
    ) -> Result<String> {
        let uuid = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO plans
                (uuid, project_uuid, title, description, phases, priority, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&uuid)
        .bind(&self.project.uuid)
        .bind(title)
        .bind(description)
        .bind(serde_json::to_string(phases)?)
        .bind(priority)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO plans_fts (uuid, title, content) VALUES (?, ?, ?)")
            .bind(&uuid)
            .bind(title)
            .bind(description)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(%uuid, title, "plan saved");
        Ok(uuid)
    }

    // ============ bulk import ============

    /// Import every matching file under `dir` into `imported_files`.
    ///
    /// Checkpoints at file granularity: each file commits independently, so
    /// a failure or cancellation mid-run leaves already-processed files
    /// committed and the run resumable.
    pub async fn import_directory(&self, dir: &Path) -> Result<ImportReport> {
        let walked = discover::walk(dir, &self.config.discovery)?;
        let mut report = ImportReport {
            files_discovered: walked.files.len(),
            files_skipped_too_large: walked.skips.too_large,
            files_skipped_unreadable: walked.skips.unreadable,
            ..Default::default()
        };

        for file in &walked.files {
            match self.import_file(file).await {
                Ok(ImportStatus::Imported) => report.files_imported += 1,
                Ok(ImportStatus::Updated) => report.files_updated += 1,
                Ok(ImportStatus::Unchanged) => report.files_unchanged += 1,
                Ok(ImportStatus::SkippedEmpty) => report.files_skipped_empty += 1,
                Err(e) => {
                    report
                        .errors
                        .push(format!("{}: {}", file.relative_path, e));
                }
            }
        }

        info!(
            imported = report.files_imported,
            updated = report.files_updated,
            unchanged = report.files_unchanged,
            errors = report.errors.len(),
            "import run finished"
        );
        Ok(report)
    }

    async fn import_file(&self, file: &discover::DiscoveredFile) -> Result<ImportStatus> {
        let content = discover::read_text(&file.path)?;
        if content.trim().is_empty() {
            return Ok(ImportStatus::SkippedEmpty);
        }
        let signature = content_signature(&content);
        let now = chrono::Utc::now().timestamp();

        let existing: Option<(String, Option<String>)> = sqlx::query(
            "SELECT uuid, content_signature FROM imported_files WHERE file_path = ? AND project_uuid = ?",
        )
        .bind(&file.relative_path)
        .bind(&self.project.uuid)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| (row.get("uuid"), row.get("content_signature")));

        let mut tx = self.pool.begin().await?;
        let status = match existing {
            Some((_, Some(ref sig))) if *sig == signature => ImportStatus::Unchanged,
            Some((uuid, _)) => {
                sqlx::query(
                    r#"
                    UPDATE imported_files
                    SET content = ?, content_signature = ?, file_size = ?,
                        updated_at = ?, file_modified = ?
                    WHERE uuid = ?
                    "#,
                )
                .bind(&content)
                .bind(&signature)
                .bind(file.size as i64)
                .bind(now)
                .bind(file.modified.timestamp())
                .bind(&uuid)
                .execute(&mut *tx)
                .await?;

                sqlx::query("DELETE FROM imported_files_fts WHERE uuid = ?")
                    .bind(&uuid)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "INSERT INTO imported_files_fts (uuid, title, content) VALUES (?, ?, ?)",
                )
                .bind(&uuid)
                .bind(file_name_of(&file.relative_path))
                .bind(&content)
                .execute(&mut *tx)
                .await?;

                ImportStatus::Updated
            }
            None => {
                let uuid = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO imported_files
                        (uuid, project_uuid, filename, file_path, content, file_size,
                         created_at, updated_at, file_created, file_modified, content_signature)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&uuid)
                .bind(&self.project.uuid)
                .bind(file_name_of(&file.relative_path))
                .bind(&file.relative_path)
                .bind(&content)
                .bind(file.size as i64)
                .bind(now)
                .bind(now)
                .bind(file.created.timestamp())
                .bind(file.modified.timestamp())
                .bind(&signature)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "INSERT INTO imported_files_fts (uuid, title, content) VALUES (?, ?, ?)",
                )
                .bind(&uuid)
                .bind(file_name_of(&file.relative_path))
                .bind(&content)
                .execute(&mut *tx)
                .await?;

                ImportStatus::Imported
            }
        };
        tx.commit().await?;

        debug!(file = %file.relative_path, ?status, "import file");
        Ok(status)
    }

    // ============ lookups ============

    /// Resolve one item by uuid or natural key, optionally scoped to a
    /// category. The natural-key path only considers active items.
    ///
    /// This is the full-content escape hatch behind the truncation policy:
    /// the returned content is never truncated.
    pub async fn find_item(
        &self,
        key: &str,
        category: Option<Category>,
    ) -> Result<ItemDetail> {
        if key.trim().is_empty() {
            return Err(Error::Validation("lookup key must not be empty".into()));
        }

        let categories: Vec<Category> = match category {
            Some(c) => vec![c],
            None => Category::ALL.to_vec(),
        };

        let mut matches = Vec::new();
        for cat in categories {
            let table = cat.table();
            let title_col = cat.title_column();
            let content_col = cat.content_column();
            let has_status = cat.active_predicate().is_some();
            let status_select = if has_status {
                match cat {
                    Category::Plan => "overall_status",
                    _ => "record_status",
                }
            } else {
                "NULL"
            };
            let active_clause = match cat.active_predicate() {
                Some(p) => format!("AND ({p} OR uuid = ?)"),
                None => String::new(),
            };
            let source_select = match cat {
                Category::Discussion | Category::Artifact | Category::Document => "source_file",
                Category::ImportedFile => "file_path",
                _ => "NULL",
            };

            let sql = format!(
                r#"
                SELECT uuid, {title_col} AS title, {content_col} AS content,
                       {status_select} AS status, created_at, {source_select} AS source_file
                FROM {table}
                WHERE project_uuid = ? AND ({title_col} = ? OR uuid = ?) {active_clause}
                "#
            );

            let mut q = sqlx::query(&sql)
                .bind(&self.project.uuid)
                .bind(key)
                .bind(key);
            if !active_clause.is_empty() {
                q = q.bind(key);
            }
            let rows = q.fetch_all(&self.pool).await?;

            for row in &rows {
                matches.push(ItemDetail {
                    category: cat,
                    uuid: row.get("uuid"),
                    title: row.get("title"),
                    content: row.get("content"),
                    status: row.get("status"),
                    created_at: row.get("created_at"),
                    source_file: row.get("source_file"),
                });
            }
        }

        match matches.len() {
            0 => Err(Error::NotFound(format!("no item matches '{}'", key))),
            1 => Ok(matches.remove(0)),
            n => Err(Error::Conflict(format!(
                "'{}' matches {} items across {}; pass --category or use the uuid",
                key,
                n,
                summarize_categories(&matches)
            ))),
        }
    }

    // ============ FTS maintenance ============

    /// Rebuild every FTS mirror from its primary table. Used for bulk
    /// recovery after large imports or detected drift.
    pub async fn resync_indexes(&self) -> Result<ResyncReport> {
        let mut report = ResyncReport::default();
        let mut tx = self.pool.begin().await?;

        for cat in Category::ALL {
            let fts = cat.fts_table();
            let table = cat.table();
            let title_col = cat.title_column();
            let content_col = cat.content_column();
            let predicate = match cat.active_predicate() {
                Some(p) => format!("WHERE {p}"),
                None => String::new(),
            };

            sqlx::query(&format!("DELETE FROM {fts}")).execute(&mut *tx).await?;
            let result = sqlx::query(&format!(
                "INSERT INTO {fts} (uuid, title, content)
                 SELECT uuid, {title_col}, {content_col} FROM {table} {predicate}"
            ))
            .execute(&mut *tx)
            .await?;

            report.entries.push((cat, result.rows_affected()));
        }

        tx.commit().await?;
        info!(total = report.total(), "FTS indexes rebuilt");
        Ok(report)
    }

    /// Row counts for the core tables, used by stats and backup metadata.
    pub async fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let mut counts = Vec::new();
        for cat in Category::ALL {
            let table = cat.table();
            let count: i64 =
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table} WHERE project_uuid = ?"))
                    .bind(&self.project.uuid)
                    .fetch_one(&self.pool)
                    .await?;
            counts.push((table, count));
        }
        let sessions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE project_uuid = ?")
                .bind(&self.project.uuid)
                .fetch_one(&self.pool)
                .await?;
        counts.push(("sessions", sessions));
        Ok(counts)
    }

    /// Close the pool. Further operations on this session fail.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportStatus {
    Imported,
    Updated,
    Unchanged,
    SkippedEmpty,
}

fn file_name_of(relative_path: &str) -> &str {
    relative_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(relative_path)
}

fn summarize_categories(matches: &[ItemDetail]) -> String {
    let mut labels: Vec<&str> = matches.iter().map(|m| m.category.label()).collect();
    labels.sort();
    labels.dedup();
    labels.join(", ")
}
