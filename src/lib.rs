//! # memobank
//!
//! A local-first project memory store. memobank syncs free-form project
//! notes (markdown and plain text) into a versioned, searchable SQLite
//! database and keeps the two in sync over repeated runs without ever
//! losing history.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ Note files   │──▶│ Smart merge  │──▶│    SQLite      │
//! │ (md / txt)   │   │ extract+diff │   │ versioned+FTS5 │
//! └──────────────┘   └──────────────┘   └──────┬─────────┘
//!                                              │
//!                            ┌─────────────────┤
//!                            ▼                 ▼
//!                      ┌──────────┐      ┌───────────┐
//!                      │   CLI    │      │ library   │
//!                      │  (mbk)   │      │ (Session) │
//!                      └──────────┘      └───────────┘
//! ```
//!
//! Edited files are parsed into items (decisions, progress entries,
//! patterns, rules); each item is matched against its previously stored
//! version by natural key and content signature. Changed items supersede
//! their predecessor, vanished items become obsolete — nothing is ever
//! deleted. Every category is mirrored into an FTS5 index for ranked,
//! highlighted cross-table search, with an adaptive truncation policy for
//! bandwidth-constrained callers.
//!
//! ## Quick start
//!
//! ```bash
//! mbk init                      # create the project store
//! mbk sync                      # smart-merge note files into the store
//! mbk search "connection pool"  # ranked full-text search
//! mbk get "Switch to sqlx"      # full untruncated content of one item
//! mbk backup run                # tiered snapshots, if one is due
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and the category/status enums |
//! | [`schema`] | Table creation and additive schema migration |
//! | [`discover`] | Filesystem walk with glob filters and size cutoff |
//! | [`extract`] | Item extraction from note text |
//! | [`store`] | The `Session` context object and all persistence |
//! | [`sync`] | Change detection and smart merge |
//! | [`search`] | Cross-category ranked full-text search |
//! | [`truncate`] | Adaptive content truncation policy |
//! | [`query`] | Raw SQL surface with truncated formatting |
//! | [`session`] | Session journal and project switching |
//! | [`backup`] | Tiered store snapshots with retention |
//! | [`stats`] | Store statistics |
//! | [`db`] | Database connection |
//! | [`error`] | Error taxonomy |

pub mod backup;
pub mod config;
pub mod db;
pub mod discover;
pub mod error;
pub mod extract;
pub mod models;
pub mod query;
pub mod schema;
pub mod search;
pub mod session;
pub mod stats;
pub mod store;
pub mod sync;
pub mod truncate;

pub use error::{Error, Result};
pub use store::Session;
