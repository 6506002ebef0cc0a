use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Directory under the project root holding the store and local backups.
pub const DATA_DIR: &str = ".memobank";
/// Store filename inside [`DATA_DIR`].
pub const STORE_FILE: &str = "store.db";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

/// Controls which files the sync and import walks consider.
#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_file_size_mb: default_max_file_size_mb(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

fn default_max_file_size_mb() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            candidate_k: default_candidate_k(),
        }
    }
}

fn default_search_limit() -> i64 {
    20
}

fn default_candidate_k() -> i64 {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    /// Directory for weekly/monthly snapshots shared across projects.
    /// Defaults to `~/.memobank/backups` when unset.
    #[serde(default)]
    pub centralized_dir: Option<PathBuf>,
    #[serde(default = "default_daily_retained")]
    pub daily_retained: usize,
    #[serde(default = "default_weekly_retained")]
    pub weekly_retained: usize,
    #[serde(default = "default_monthly_retained")]
    pub monthly_retained: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            centralized_dir: None,
            daily_retained: default_daily_retained(),
            weekly_retained: default_weekly_retained(),
            monthly_retained: default_monthly_retained(),
        }
    }
}

fn default_daily_retained() -> usize {
    7
}
fn default_weekly_retained() -> usize {
    4
}
fn default_monthly_retained() -> usize {
    6
}

/// Load configuration for a project.
///
/// Reads `<project>/.memobank.toml` when present; a missing file yields the
/// defaults so a fresh project works with zero setup.
pub fn load_config(project_root: &Path) -> Result<Config> {
    let path = project_root.join(".memobank.toml");
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.discovery.max_file_size_mb == 0 {
        anyhow::bail!("discovery.max_file_size_mb must be > 0");
    }
    if config.search.default_limit < 1 {
        anyhow::bail!("search.default_limit must be >= 1");
    }
    if config.backup.daily_retained == 0
        || config.backup.weekly_retained == 0
        || config.backup.monthly_retained == 0
    {
        anyhow::bail!("backup retention counts must be >= 1");
    }

    Ok(config)
}

/// Path of the project store file.
pub fn store_path(project_root: &Path) -> PathBuf {
    project_root.join(DATA_DIR).join(STORE_FILE)
}
