//! Schema lifecycle: table creation, additive migration, project identity.
//!
//! `initialize` is safe to run on every startup. It creates missing tables
//! and indexes, detects schema drift on already-existing tables (columns
//! added in later versions) and applies additive-only migrations — columns
//! and indexes are added, existing data is never altered or dropped.

use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::RepairReport;

/// Stable identity of the project owning a store.
///
/// The UUID is assigned once per canonical project path and reused across
/// restarts by path lookup — never re-derived from content.
#[derive(Debug, Clone)]
pub struct ProjectIdentity {
    pub uuid: String,
    pub name: String,
    pub path: String,
}

/// `(table name, CREATE TABLE statement)` for every primary table.
const TABLES: [(&str, &str); 8] = [
    (
        "projects",
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            uuid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            path TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            last_active INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    ),
    (
        "documents",
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY,
            uuid TEXT UNIQUE NOT NULL,
            project_uuid TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            doc_type TEXT NOT NULL DEFAULT 'general',
            tags TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            source_file TEXT,
            source_file_created INTEGER,
            source_file_modified INTEGER,
            record_status TEXT NOT NULL DEFAULT 'active',
            content_signature TEXT,
            FOREIGN KEY (project_uuid) REFERENCES projects (uuid)
        )
        "#,
    ),
    (
        "discussions",
        r#"
        CREATE TABLE IF NOT EXISTS discussions (
            id INTEGER PRIMARY KEY,
            uuid TEXT UNIQUE NOT NULL,
            project_uuid TEXT NOT NULL,
            summary TEXT NOT NULL,
            content TEXT NOT NULL,
            implemented INTEGER,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            source_file TEXT,
            source_file_created INTEGER,
            source_file_modified INTEGER,
            record_status TEXT NOT NULL DEFAULT 'active',
            content_signature TEXT,
            FOREIGN KEY (project_uuid) REFERENCES projects (uuid)
        )
        "#,
    ),
    (
        "artifacts",
        r#"
        CREATE TABLE IF NOT EXISTS artifacts (
            id INTEGER PRIMARY KEY,
            uuid TEXT UNIQUE NOT NULL,
            project_uuid TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            artifact_type TEXT NOT NULL DEFAULT 'general',
            filename TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            source_file TEXT,
            source_file_created INTEGER,
            source_file_modified INTEGER,
            record_status TEXT NOT NULL DEFAULT 'active',
            content_signature TEXT,
            FOREIGN KEY (project_uuid) REFERENCES projects (uuid)
        )
        "#,
    ),
    (
        "code_snapshots",
        r#"
        CREATE TABLE IF NOT EXISTS code_snapshots (
            id INTEGER PRIMARY KEY,
            uuid TEXT UNIQUE NOT NULL,
            project_uuid TEXT NOT NULL,
            filename TEXT NOT NULL,
            content TEXT NOT NULL,
            version_number INTEGER NOT NULL DEFAULT 1,
            description TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            FOREIGN KEY (project_uuid) REFERENCES projects (uuid)
        )
        "#,
    ),
    (
        "plans",
        r#"
        CREATE TABLE IF NOT EXISTS plans (
            id INTEGER PRIMARY KEY,
            uuid TEXT UNIQUE NOT NULL,
            project_uuid TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            phases TEXT NOT NULL DEFAULT '[]',
            current_phase INTEGER NOT NULL DEFAULT 1,
            overall_status TEXT NOT NULL DEFAULT 'active',
            priority TEXT NOT NULL DEFAULT 'medium',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (project_uuid) REFERENCES projects (uuid)
        )
        "#,
    ),
    (
        "imported_files",
        r#"
        CREATE TABLE IF NOT EXISTS imported_files (
            id INTEGER PRIMARY KEY,
            uuid TEXT UNIQUE NOT NULL,
            project_uuid TEXT NOT NULL,
            filename TEXT NOT NULL,
            file_path TEXT NOT NULL UNIQUE,
            content TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            file_created INTEGER,
            file_modified INTEGER,
            content_signature TEXT,
            FOREIGN KEY (project_uuid) REFERENCES projects (uuid)
        )
        "#,
    ),
    (
        "sessions",
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            session_uuid TEXT UNIQUE NOT NULL,
            project_uuid TEXT NOT NULL,
            summary TEXT NOT NULL,
            context_snapshot TEXT NOT NULL DEFAULT '{}',
            next_steps TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (project_uuid) REFERENCES projects (uuid)
        )
        "#,
    ),
];

/// FTS5 mirror tables. Each carries the same shape so the search engine can
/// query every category uniformly: `(uuid UNINDEXED, title, content)`.
const FTS_TABLES: [&str; 6] = [
    "documents_fts",
    "discussions_fts",
    "artifacts_fts",
    "code_snapshots_fts",
    "plans_fts",
    "imported_files_fts",
];

/// Columns that older stores may be missing, per table. Drift is detected
/// via `PRAGMA table_info` and repaired with `ALTER TABLE ... ADD COLUMN`.
const EXPECTED_COLUMNS: [(&str, &[(&str, &str)]); 3] = [
    ("discussions", &SOURCE_TRACKING_COLUMNS),
    ("artifacts", &SOURCE_TRACKING_COLUMNS),
    ("documents", &SOURCE_TRACKING_COLUMNS),
];

const SOURCE_TRACKING_COLUMNS: [(&str, &str); 5] = [
    ("source_file", "TEXT"),
    ("source_file_created", "INTEGER"),
    ("source_file_modified", "INTEGER"),
    ("record_status", "TEXT NOT NULL DEFAULT 'active'"),
    ("content_signature", "TEXT"),
];

/// `(index name, CREATE INDEX statement)` for every secondary index.
const INDEXES: [(&str, &str); 8] = [
    (
        "idx_discussions_source_file",
        "CREATE INDEX IF NOT EXISTS idx_discussions_source_file ON discussions(source_file)",
    ),
    (
        "idx_discussions_status",
        "CREATE INDEX IF NOT EXISTS idx_discussions_status ON discussions(record_status)",
    ),
    (
        "idx_artifacts_source_file",
        "CREATE INDEX IF NOT EXISTS idx_artifacts_source_file ON artifacts(source_file)",
    ),
    (
        "idx_artifacts_status",
        "CREATE INDEX IF NOT EXISTS idx_artifacts_status ON artifacts(record_status)",
    ),
    (
        "idx_documents_status",
        "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(record_status)",
    ),
    (
        "idx_plans_status",
        "CREATE INDEX IF NOT EXISTS idx_plans_status ON plans(overall_status)",
    ),
    (
        "idx_imported_files_path",
        "CREATE INDEX IF NOT EXISTS idx_imported_files_path ON imported_files(file_path)",
    ),
    (
        "idx_sessions_project",
        "CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_uuid)",
    ),
];

/// Initialize the store: create tables, repair drift, resolve the project
/// identity. Idempotent — safe on every startup.
pub async fn initialize(pool: &SqlitePool, project_path: &Path) -> Result<ProjectIdentity> {
    let report = verify_and_repair(pool).await?;
    if !report.is_clean() {
        info!(
            tables = report.tables_created.len(),
            columns = report.columns_added.len(),
            indexes = report.indexes_added.len(),
            "schema repaired"
        );
    }
    ensure_project_record(pool, project_path).await
}

/// Re-run schema detection and backfill, reporting what was added.
///
/// The whole pass runs inside one transaction: a partial repair is never
/// observable, and any failure aborts the pass entirely.
pub async fn verify_and_repair(pool: &SqlitePool) -> Result<RepairReport> {
    let mut report = RepairReport::default();
    let mut tx = pool.begin().await?;

    let existing_tables = list_tables(&mut tx).await?;

    for (name, create_sql) in TABLES {
        if !existing_tables.contains(&name.to_string()) {
            report.tables_created.push(name.to_string());
        }
        sqlx::query(create_sql).execute(&mut *tx).await?;
    }

    // FTS5 CREATE is not idempotent natively, so check first
    for fts in FTS_TABLES {
        if !existing_tables.contains(&fts.to_string()) {
            sqlx::query(&format!(
                "CREATE VIRTUAL TABLE {fts} USING fts5(uuid UNINDEXED, title, content)"
            ))
            .execute(&mut *tx)
            .await?;
            report.tables_created.push(fts.to_string());
        }
    }

    // Additive column migration for tables that predate source tracking
    for (table, expected) in EXPECTED_COLUMNS {
        let present = table_columns(&mut tx, table).await?;
        for &(column, decl) in expected {
            if !present.contains(&column.to_string()) {
                sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
                    .execute(&mut *tx)
                    .await?;
                report.columns_added.push(format!("{table}.{column}"));
            }
        }
    }

    let existing_indexes = list_indexes(&mut tx).await?;
    for (name, create_sql) in INDEXES {
        if !existing_indexes.contains(&name.to_string()) {
            report.indexes_added.push(name.to_string());
        }
        sqlx::query(create_sql).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(report)
}

/// Confirm the core tables exist. Returns `Integrity` if any is missing —
/// used by callers that must not run against a half-created store.
pub async fn verify_core_tables(pool: &SqlitePool) -> Result<()> {
    let mut conn = pool.acquire().await?;
    let existing = {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|r| r.get::<String, _>("name"))
            .collect::<Vec<_>>()
    };
    for (name, _) in TABLES {
        if !existing.contains(&name.to_string()) {
            return Err(Error::Integrity(format!(
                "core table '{}' missing after initialization",
                name
            )));
        }
    }
    Ok(())
}

async fn list_tables(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.iter().map(|r| r.get("name")).collect())
}

async fn list_indexes(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
) -> Result<Vec<String>> {
    let rows =
        sqlx::query("SELECT name FROM sqlite_master WHERE type = 'index' AND sql IS NOT NULL")
            .fetch_all(&mut **tx)
            .await?;
    Ok(rows.iter().map(|r| r.get("name")).collect())
}

async fn table_columns(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    table: &str,
) -> Result<Vec<String>> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.iter().map(|r| r.get("name")).collect())
}

/// Look up the project record by canonical path, creating it on first use.
async fn ensure_project_record(
    pool: &SqlitePool,
    project_path: &Path,
) -> Result<ProjectIdentity> {
    let canonical = project_path
        .canonicalize()
        .unwrap_or_else(|_| project_path.to_path_buf());
    let path_str = canonical.to_string_lossy().to_string();
    let name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.clone());
    let now = chrono::Utc::now().timestamp();

    let existing: Option<String> =
        sqlx::query_scalar("SELECT uuid FROM projects WHERE path = ?")
            .bind(&path_str)
            .fetch_optional(pool)
            .await?;

    if let Some(uuid) = existing {
        sqlx::query("UPDATE projects SET last_active = ? WHERE uuid = ?")
            .bind(now)
            .bind(&uuid)
            .execute(pool)
            .await?;
        return Ok(ProjectIdentity {
            uuid,
            name,
            path: path_str,
        });
    }

    let uuid = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO projects (uuid, name, path, description, created_at, last_active, metadata)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&uuid)
    .bind(&name)
    .bind(&path_str)
    .bind(format!("memobank store for {name}"))
    .bind(now)
    .bind(now)
    .bind("{}")
    .execute(pool)
    .await?;

    info!(project = %name, %uuid, "new project registered");

    Ok(ProjectIdentity {
        uuid,
        name,
        path: path_str,
    })
}
