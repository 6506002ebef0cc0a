//! # memobank CLI (`mbk`)
//!
//! The `mbk` binary is the primary interface for memobank. It provides
//! commands for store initialization, note synchronization, bulk import,
//! ranked search, item retrieval, raw SQL queries, snapshots, and session
//! continuity.
//!
//! ## Usage
//!
//! ```bash
//! mbk --project ./my-project <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mbk init` | Create the store and run schema setup |
//! | `mbk sync [path]` | Smart-merge note files into the store |
//! | `mbk import <dir>` | Bulk-import a directory of text files |
//! | `mbk search "<query>"` | Ranked cross-category full-text search |
//! | `mbk get <key>` | Full untruncated content of one item |
//! | `mbk query "<sql>"` | Raw SQL with adaptive truncation |
//! | `mbk stats` | Store statistics |
//! | `mbk repair` | Verify and repair the schema |
//! | `mbk resync` | Rebuild all search indexes |
//! | `mbk backup <action>` | Create, run, list, or verify snapshots |
//! | `mbk session <action>` | Save or list session journal entries |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use memobank::backup::{self, SnapshotOutcome, Tier};
use memobank::config;
use memobank::models::Category;
use memobank::query;
use memobank::schema;
use memobank::search;
use memobank::session::{self as session_mod};
use memobank::stats;
use memobank::store::Session;
use memobank::sync;
use memobank::truncate::{self, Limit};

/// memobank — a local-first project memory store.
///
/// Notes stay as plain files; `mbk sync` mirrors them into a versioned,
/// searchable SQLite store without ever losing history.
#[derive(Parser)]
#[command(
    name = "mbk",
    about = "memobank — sync free-form project notes into a versioned, searchable store",
    version
)]
struct Cli {
    /// Project root directory. The store lives at `<project>/.memobank/`.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the project store.
    ///
    /// Creates the SQLite file, all tables and FTS indexes, and registers
    /// the project identity. Idempotent — running it again is safe and
    /// repairs schema drift on stores created by older versions.
    Init,

    /// Smart-merge note files into the store.
    ///
    /// Without a path, walks the project tree using the configured
    /// include/exclude globs. Unchanged files (by mtime) are skipped;
    /// changed items supersede their stored version, vanished items become
    /// obsolete. Nothing is ever deleted.
    Sync {
        /// Sync a single file instead of the whole tree.
        path: Option<PathBuf>,

        /// Re-process files even when their mtime says they are unchanged.
        #[arg(long)]
        force: bool,
    },

    /// Bulk-import a directory of text files as searchable documents.
    ///
    /// Files are stored whole in the imported-files table (no item
    /// extraction) and indexed for search. Re-importing an unchanged file
    /// is a no-op; oversized or unreadable files are counted and skipped.
    Import {
        /// Directory to walk.
        dir: PathBuf,
    },

    /// Ranked full-text search across all content categories.
    Search {
        /// The search query (FTS5 syntax supported).
        query: String,

        /// Restrict to one or more categories
        /// (documents, discussions, artifacts, snapshots, plans, imports).
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<i64>,

        /// Override the truncation budget (characters per value).
        #[arg(long)]
        max_chars: Option<usize>,

        /// Disable truncation entirely.
        #[arg(long)]
        no_limit: bool,
    },

    /// Retrieve one item's full, untruncated content.
    ///
    /// The key is a natural key (title/summary) or a uuid. Ambiguous keys
    /// ask for a `--category`.
    Get {
        key: String,

        #[arg(long)]
        category: Option<String>,
    },

    /// Execute a raw SQL query against the store.
    ///
    /// Output passes through the adaptive truncation policy: the query
    /// text picks the character budget unless overridden.
    Query {
        sql: String,

        /// Override the truncation budget (characters per value).
        #[arg(long)]
        max_chars: Option<usize>,

        /// Disable truncation entirely.
        #[arg(long)]
        no_limit: bool,
    },

    /// Show store statistics.
    Stats,

    /// Verify the schema and apply additive repairs.
    Repair,

    /// Rebuild all FTS indexes from the primary tables.
    Resync,

    /// Manage store snapshots.
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Manage the session journal.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// Create a snapshot in one tier.
    Create {
        /// Tier: daily, weekly, or monthly.
        #[arg(long, default_value = "daily")]
        tier: String,

        /// Create even if this period already has a snapshot.
        #[arg(long)]
        force: bool,
    },
    /// Create snapshots for every tier whose period has elapsed.
    Run,
    /// List all snapshots.
    List,
    /// Verify the integrity of every snapshot.
    Verify,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Save the current focus onto this session's journal entry.
    Save {
        summary: String,

        #[arg(long, default_value = "")]
        next_steps: String,
    },
    /// List recent session journal entries.
    List {
        #[arg(long, default_value_t = 5)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.project)?;

    match cli.command {
        Commands::Init => {
            let session = Session::initialize(&cli.project, cfg).await?;
            println!(
                "Store initialized for '{}' at {}",
                session.project().name,
                session.store_path().display()
            );
            session.close().await;
        }

        Commands::Sync { path, force } => {
            let session = Session::open(&cli.project, cfg).await?;
            match path {
                Some(path) => {
                    let outcome = sync::synchronize_path(&session, &path, force).await?;
                    println!("sync {}", path.display());
                    println!("  new:     {}", outcome.new_items.len());
                    println!("  updated: {}", outcome.updated_items.len());
                    println!("  removed: {}", outcome.removed_items.len());
                    for warning in &outcome.warnings {
                        println!("  warning: {}", warning);
                    }
                    if outcome.is_empty() {
                        println!("  (no changes)");
                    }
                }
                None => {
                    let report = sync::sync_all(&session, force).await?;
                    println!("sync");
                    println!("  files processed: {}", report.files_processed);
                    println!("  files unchanged: {}", report.files_skipped_unchanged);
                    println!("  files failed:    {}", report.files_failed);
                    println!("  items new:       {}", report.items_new);
                    println!("  items updated:   {}", report.items_updated);
                    println!("  items removed:   {}", report.items_removed);
                    for warning in &report.warnings {
                        println!("  warning: {}", warning);
                    }
                    for error in &report.errors {
                        println!("  error: {}", error);
                    }
                }
            }
            session.close().await;
        }

        Commands::Import { dir } => {
            let session = Session::open(&cli.project, cfg).await?;
            let report = session.import_directory(&dir).await?;
            println!("import {}", dir.display());
            println!("  discovered: {}", report.files_discovered);
            println!("  imported:   {}", report.files_imported);
            println!("  updated:    {}", report.files_updated);
            println!("  unchanged:  {}", report.files_unchanged);
            println!(
                "  skipped:    {} too large, {} unreadable, {} empty",
                report.files_skipped_too_large,
                report.files_skipped_unreadable,
                report.files_skipped_empty
            );
            for error in &report.errors {
                println!("  error: {}", error);
            }
            session.close().await;
        }

        Commands::Search {
            query,
            categories,
            limit,
            max_chars,
            no_limit,
        } => {
            let session = Session::open(&cli.project, cfg).await?;
            let cats = parse_categories(&categories)?;
            let final_limit = limit.unwrap_or(session.config().search.default_limit);

            let results = search::search(&session, &query, cats.as_deref(), final_limit).await?;
            let decision = truncate::decide(&query, override_limit(max_chars, no_limit));
            let (rendered, _) = search::render_results(&results, &query, decision.limit);
            print!("{}", rendered);
            session.close().await;
        }

        Commands::Get { key, category } => {
            let session = Session::open(&cli.project, cfg).await?;
            let cat = category
                .map(|c| c.parse::<Category>().map_err(anyhow::Error::msg))
                .transpose()?;
            let item = session.find_item(&key, cat).await?;

            println!("--- {} ---", item.category.label());
            println!("title:      {}", item.title);
            println!("uuid:       {}", item.uuid);
            if let Some(ref status) = item.status {
                println!("status:     {}", status);
            }
            if let Some(ref source) = item.source_file {
                println!("source:     {}", source);
            }
            println!(
                "created_at: {}",
                chrono::DateTime::from_timestamp(item.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default()
            );
            println!();
            println!("{}", item.content);
            session.close().await;
        }

        Commands::Query {
            sql,
            max_chars,
            no_limit,
        } => {
            let session = Session::open(&cli.project, cfg).await?;
            let output =
                query::run_query(&session, &sql, override_limit(max_chars, no_limit)).await?;
            print!("{}", query::render_output(&output));
            session.close().await;
        }

        Commands::Stats => {
            let session = Session::open(&cli.project, cfg).await?;
            stats::run_stats(&session).await?;
            session.close().await;
        }

        Commands::Repair => {
            let session = Session::open(&cli.project, cfg).await?;
            let report = schema::verify_and_repair(session.pool()).await?;
            if report.is_clean() {
                println!("Schema verified, nothing to repair.");
            } else {
                println!("Schema repaired:");
                for t in &report.tables_created {
                    println!("  table created: {}", t);
                }
                for c in &report.columns_added {
                    println!("  column added: {}", c);
                }
                for i in &report.indexes_added {
                    println!("  index added: {}", i);
                }
            }
            session.close().await;
        }

        Commands::Resync => {
            let session = Session::open(&cli.project, cfg).await?;
            let report = session.resync_indexes().await?;
            println!("FTS indexes rebuilt ({} entries)", report.total());
            for (cat, count) in &report.entries {
                println!("  {:<16} {}", cat.label(), count);
            }
            session.close().await;
        }

        Commands::Backup { action } => {
            let session = Session::open(&cli.project, cfg).await?;
            match action {
                BackupAction::Create { tier, force } => {
                    let tier: Tier = tier.parse().map_err(anyhow::Error::msg)?;
                    match backup::create_snapshot(&session, tier, force).await? {
                        SnapshotOutcome::Created { path, size } => {
                            println!("Snapshot created: {} ({} bytes)", path.display(), size);
                        }
                        SnapshotOutcome::SkippedExists { existing } => {
                            println!(
                                "Snapshot already covers this period: {}",
                                existing.display()
                            );
                        }
                    }
                }
                BackupAction::Run => {
                    for (tier, outcome) in backup::run_due(&session).await? {
                        match outcome {
                            SnapshotOutcome::Created { path, .. } => {
                                println!("{}: created {}", tier.as_str(), path.display());
                            }
                            SnapshotOutcome::SkippedExists { .. } => {
                                println!("{}: up to date", tier.as_str());
                            }
                        }
                    }
                }
                BackupAction::List => {
                    let entries = backup::list_snapshots(&session)?;
                    if entries.is_empty() {
                        println!("No snapshots.");
                    }
                    for entry in entries {
                        println!(
                            "{:<8} {:>10}  {}",
                            entry.tier.as_str(),
                            entry.size,
                            entry.path.display()
                        );
                    }
                }
                BackupAction::Verify => {
                    let (verified, failed) = backup::verify_all(&session).await?;
                    println!("{} verified, {} failed", verified, failed);
                    if failed > 0 {
                        std::process::exit(1);
                    }
                }
            }
            session.close().await;
        }

        Commands::Session { action } => {
            let session = Session::open(&cli.project, cfg).await?;
            match action {
                SessionAction::Save {
                    summary,
                    next_steps,
                } => {
                    session.save_context(&summary, &next_steps).await?;
                    println!("Session context saved.");
                }
                SessionAction::List { limit } => {
                    let records: Vec<session_mod::SessionRecord> =
                        session.latest_sessions(limit).await?;
                    for record in records {
                        let date = chrono::DateTime::from_timestamp(record.updated_at, 0)
                            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_default();
                        println!(
                            "{}  [{}] {}",
                            date, record.status, record.summary
                        );
                        if !record.next_steps.is_empty() {
                            println!("                  next: {}", record.next_steps);
                        }
                    }
                }
            }
            session.close().await;
        }
    }

    Ok(())
}

fn parse_categories(raw: &[String]) -> Result<Option<Vec<Category>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    let cats = raw
        .iter()
        .map(|c| c.parse::<Category>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(cats))
}

fn override_limit(max_chars: Option<usize>, no_limit: bool) -> Option<Limit> {
    if no_limit {
        Some(Limit::Unlimited)
    } else {
        max_chars.map(Limit::Chars)
    }
}
