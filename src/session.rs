//! Session journal and project switching.
//!
//! Every opened `Session` records a row in the `sessions` table so a later
//! caller can pick up where the previous one left off. Switching projects
//! flushes the current session state and releases the old connection before
//! the new one is opened.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::config;
use crate::db;
use crate::error::{Error, Result};
use crate::schema::{self, ProjectIdentity};
use crate::store::Session;

/// Journal row as shown to callers.
#[derive(Debug, Serialize)]
pub struct SessionRecord {
    pub session_uuid: String,
    pub summary: String,
    pub next_steps: String,
    pub status: String,
    pub updated_at: i64,
}

#[derive(Debug, Serialize)]
pub struct SwitchInfo {
    pub old_project: String,
    pub new_project: String,
    pub old_session_uuid: String,
    pub new_session_uuid: String,
}

#[derive(Debug, Serialize)]
struct ContextSnapshot<'a> {
    project_path: &'a str,
    summary: &'a str,
}

/// Insert the journal row for a newly opened session.
pub(crate) async fn open_session_row(
    pool: &SqlitePool,
    project: &ProjectIdentity,
) -> Result<String> {
    let session_uuid = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();
    let summary = format!("session started for {}", project.name);
    let snapshot = serde_json::to_string(&ContextSnapshot {
        project_path: &project.path,
        summary: &summary,
    })?;

    sqlx::query(
        r#"
        INSERT INTO sessions
            (session_uuid, project_uuid, summary, context_snapshot, next_steps, status,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, '', 'active', ?, ?)
        "#,
    )
    .bind(&session_uuid)
    .bind(&project.uuid)
    .bind(&summary)
    .bind(&snapshot)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(session_uuid)
}

impl Session {
    /// Persist the current focus and next steps onto this session's
    /// journal row.
    pub async fn save_context(&self, summary: &str, next_steps: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let snapshot = serde_json::to_string(&ContextSnapshot {
            project_path: &self.project().path,
            summary,
        })?;

        sqlx::query(
            r#"
            UPDATE sessions
            SET summary = ?, context_snapshot = ?, next_steps = ?, updated_at = ?
            WHERE session_uuid = ?
            "#,
        )
        .bind(summary)
        .bind(&snapshot)
        .bind(next_steps)
        .bind(now)
        .bind(self.session_uuid())
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Most recent journal rows for this project, newest first.
    pub async fn latest_sessions(&self, limit: i64) -> Result<Vec<SessionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT session_uuid, summary, next_steps, status, updated_at
            FROM sessions
            WHERE project_uuid = ?
            ORDER BY updated_at DESC
            LIMIT ?
            "#,
        )
        .bind(&self.project().uuid)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| SessionRecord {
                session_uuid: row.get("session_uuid"),
                summary: row.get("summary"),
                next_steps: row.get("next_steps"),
                status: row.get("status"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Gracefully switch to another project.
    ///
    /// Order matters: the current session state is flushed and its journal
    /// row completed, then the old pool is released, and only then is the
    /// new store opened.
    pub async fn switch_project(&mut self, new_root: &Path) -> Result<SwitchInfo> {
        let old_project = self.project().name.clone();
        let old_session_uuid = self.session_uuid().to_string();

        self.save_context("switching projects", "").await?;
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE sessions SET status = 'completed', updated_at = ? WHERE session_uuid = ?",
        )
        .bind(now)
        .bind(&old_session_uuid)
        .execute(self.pool())
        .await?;
        self.pool().close().await;

        let new_config =
            config::load_config(new_root).map_err(|e| Error::Config(e.to_string()))?;
        let store = config::store_path(new_root);
        let pool = db::connect(&store).await?;
        let project = schema::initialize(&pool, new_root).await?;
        let new_session_uuid = open_session_row(&pool, &project).await?;

        let info = SwitchInfo {
            old_project,
            new_project: project.name.clone(),
            old_session_uuid,
            new_session_uuid: new_session_uuid.clone(),
        };

        self.replace_connection(
            pool,
            project,
            new_config,
            new_root.to_path_buf(),
            new_session_uuid,
        );
        info!(old = %info.old_project, new = %info.new_project, "project switched");
        Ok(info)
    }
}
