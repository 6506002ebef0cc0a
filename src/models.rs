//! Core data types used throughout memobank.
//!
//! These types represent the content categories, the record lifecycle, the
//! items flowing through the smart-merge pipeline, and the reports returned
//! to callers.

use serde::Serialize;

/// A content category stored in the project database.
///
/// This is the closed set of known tables: table and index names are always
/// resolved from this enum at compile time, never interpolated from user
/// input. Each category owns a primary table and an FTS5 mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Document,
    Discussion,
    Artifact,
    CodeSnapshot,
    Plan,
    ImportedFile,
}

impl Category {
    /// All categories, in fixed display order (a presentation convenience,
    /// not a ranking rule).
    pub const ALL: [Category; 6] = [
        Category::Document,
        Category::Discussion,
        Category::Artifact,
        Category::CodeSnapshot,
        Category::Plan,
        Category::ImportedFile,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Category::Document => "documents",
            Category::Discussion => "discussions",
            Category::Artifact => "artifacts",
            Category::CodeSnapshot => "code_snapshots",
            Category::Plan => "plans",
            Category::ImportedFile => "imported_files",
        }
    }

    pub fn fts_table(&self) -> &'static str {
        match self {
            Category::Document => "documents_fts",
            Category::Discussion => "discussions_fts",
            Category::Artifact => "artifacts_fts",
            Category::CodeSnapshot => "code_snapshots_fts",
            Category::Plan => "plans_fts",
            Category::ImportedFile => "imported_files_fts",
        }
    }

    /// Column holding the natural key / display title.
    pub fn title_column(&self) -> &'static str {
        match self {
            Category::Document => "title",
            Category::Discussion => "summary",
            Category::Artifact => "title",
            Category::CodeSnapshot => "filename",
            Category::Plan => "title",
            Category::ImportedFile => "filename",
        }
    }

    /// Column holding the searchable body text.
    pub fn content_column(&self) -> &'static str {
        match self {
            Category::Plan => "description",
            _ => "content",
        }
    }

    /// SQL predicate selecting the rows that belong in the FTS mirror.
    /// `None` means every row is indexed (categories without a lifecycle).
    pub fn active_predicate(&self) -> Option<&'static str> {
        match self {
            Category::Document | Category::Discussion | Category::Artifact => {
                Some("record_status = 'active'")
            }
            Category::Plan => Some("overall_status = 'active'"),
            Category::CodeSnapshot | Category::ImportedFile => None,
        }
    }

    /// Human-readable label used in rendered output.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Document => "documents",
            Category::Discussion => "discussions",
            Category::Artifact => "artifacts",
            Category::CodeSnapshot => "code snapshots",
            Category::Plan => "plans",
            Category::ImportedFile => "imported files",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" | "documents" => Ok(Category::Document),
            "discussion" | "discussions" => Ok(Category::Discussion),
            "artifact" | "artifacts" => Ok(Category::Artifact),
            "snapshot" | "snapshots" | "code_snapshot" | "code_snapshots" => {
                Ok(Category::CodeSnapshot)
            }
            "plan" | "plans" => Ok(Category::Plan),
            "import" | "imports" | "imported_file" | "imported_files" => {
                Ok(Category::ImportedFile)
            }
            other => Err(format!(
                "unknown category '{}' (expected one of: documents, discussions, artifacts, snapshots, plans, imports)",
                other
            )),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state of a stored item.
///
/// Transitions are one-directional: `Active → Superseded` when a newer
/// version of the same natural key replaces it, `Active → Obsolete` when the
/// key vanishes from its source file. Superseded and obsolete are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Superseded,
    Obsolete,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Superseded => "superseded",
            RecordStatus::Obsolete => "obsolete",
        }
    }
}

/// Which merge-managed table an extracted item belongs to.
///
/// The smart merge only manages discussions (decisions, progress entries)
/// and artifacts (patterns, rules); the remaining categories are written
/// through explicit save operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Discussion,
    Artifact,
}

impl ItemKind {
    pub fn category(&self) -> Category {
        match self {
            ItemKind::Discussion => Category::Discussion,
            ItemKind::Artifact => Category::Artifact,
        }
    }
}

/// An item extracted from a source file, before persistence.
#[derive(Debug, Clone)]
pub struct CandidateItem {
    pub kind: ItemKind,
    /// Human-meaningful title/summary, used to match the item across runs.
    pub natural_key: String,
    pub content: String,
    pub tags: Vec<String>,
    /// For progress entries: whether the task is marked done. `None` when
    /// the source gives no signal (e.g. decisions).
    pub implemented: Option<bool>,
    /// Hash of whitespace-normalized content; formatting-only edits do not
    /// change it.
    pub signature: String,
}

/// A previously stored active item, as loaded for diffing.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub kind: ItemKind,
    pub uuid: String,
    pub natural_key: String,
    pub content_signature: String,
}

/// The complete diff for one synchronization pass over one file.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub new_items: Vec<CandidateItem>,
    /// Incoming item paired with the uuid of the active item it supersedes.
    pub updated_items: Vec<(CandidateItem, String)>,
    /// Active items whose natural key vanished from the file.
    pub removed_items: Vec<StoredItem>,
    pub warnings: Vec<String>,
}

impl MergeOutcome {
    pub fn is_empty(&self) -> bool {
        self.new_items.is_empty() && self.updated_items.is_empty() && self.removed_items.is_empty()
    }
}

/// Per-file entry in a batch sync report.
#[derive(Debug, Serialize)]
pub struct FileSyncDetail {
    pub path: String,
    pub status: FileSyncStatus,
    pub items_new: usize,
    pub items_updated: usize,
    pub items_removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSyncStatus {
    Synced,
    SkippedUnchanged,
    Failed,
}

/// Tally for a directory-wide sync run. Errors are accumulated per file; a
/// single bad file never aborts the run.
#[derive(Debug, Default, Serialize)]
pub struct SyncBatchReport {
    pub files_processed: usize,
    pub files_skipped_unchanged: usize,
    pub files_failed: usize,
    pub items_new: usize,
    pub items_updated: usize,
    pub items_removed: usize,
    pub details: Vec<FileSyncDetail>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Tally for a bulk import run over a directory tree.
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub files_discovered: usize,
    pub files_imported: usize,
    pub files_updated: usize,
    pub files_unchanged: usize,
    pub files_skipped_too_large: usize,
    pub files_skipped_unreadable: usize,
    pub files_skipped_empty: usize,
    pub errors: Vec<String>,
}

/// A single hit from the cross-category search.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub category: Category,
    pub uuid: String,
    pub title: String,
    /// Title with match markers applied by FTS5 `highlight()`.
    pub title_highlight: String,
    /// Context snippet with match markers applied by FTS5 `snippet()`.
    pub snippet: String,
    /// BM25-style relevance rank; lower is more relevant.
    pub rank: f64,
    pub created_at: i64,
}

/// What a schema verification/repair pass changed.
#[derive(Debug, Default, Serialize)]
pub struct RepairReport {
    pub tables_created: Vec<String>,
    pub columns_added: Vec<String>,
    pub indexes_added: Vec<String>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.tables_created.is_empty()
            && self.columns_added.is_empty()
            && self.indexes_added.is_empty()
    }
}

/// Per-category row counts from a full FTS rebuild.
#[derive(Debug, Default, Serialize)]
pub struct ResyncReport {
    pub entries: Vec<(Category, u64)>,
}

impl ResyncReport {
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, n)| n).sum()
    }
}
