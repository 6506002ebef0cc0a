//! Filesystem discovery for sync and import runs.
//!
//! Walks a directory tree applying include/exclude glob patterns and a
//! maximum file-size cutoff. Oversized, unreadable and empty files are
//! skipped and counted, never errored.

use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};

/// A candidate source file found by the walk. Content is not read here;
/// the sync engine reads it only after the change gate passes.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Path relative to the walk root, used as the stable file identifier.
    pub relative_path: String,
    pub modified: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub size: u64,
}

/// Skip tally for one walk.
#[derive(Debug, Default)]
pub struct WalkSkips {
    pub too_large: usize,
    pub unreadable: usize,
}

#[derive(Debug)]
pub struct WalkResult {
    pub files: Vec<DiscoveredFile>,
    pub skips: WalkSkips,
}

/// Walk `root` and return matching files in deterministic path order.
pub fn walk(root: &Path, config: &DiscoveryConfig) -> Result<WalkResult> {
    if !root.exists() {
        return Err(Error::NotFound(format!(
            "directory does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/.memobank/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let max_size = config.max_file_size_mb * 1024 * 1024;
    let mut files = Vec::new();
    let mut skips = WalkSkips::default();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => {
                skips.unreadable += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => {
                skips.unreadable += 1;
                continue;
            }
        };
        if metadata.len() > max_size {
            skips.too_large += 1;
            continue;
        }

        files.push(DiscoveredFile {
            path: path.to_path_buf(),
            relative_path: rel_str,
            modified: system_time_to_utc(metadata.modified().ok()),
            created: system_time_to_utc(metadata.created().ok()),
            size: metadata.len(),
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    Ok(WalkResult { files, skips })
}

/// Read a file as text: UTF-8 first, Latin-1 as the fallback when the bytes
/// do not decode.
pub fn read_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => Ok(e.into_bytes().iter().map(|&b| b as char).collect()),
    }
}

fn system_time_to_utc(time: Option<SystemTime>) -> DateTime<Utc> {
    let secs = time
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Validation(format!("bad glob pattern '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Validation(format!("glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn latin1_fallback_preserves_length() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("legacy.txt");
        // 0xE9 is 'é' in Latin-1 but invalid as a standalone UTF-8 byte
        fs::write(&path, b"caf\xe9 notes").unwrap();

        let text = read_text(&path).unwrap();
        assert_eq!(text, "café notes");
    }

    #[test]
    fn walk_applies_includes_excludes_and_size_cutoff() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("notes.md"), "# hi").unwrap();
        fs::write(tmp.path().join("readme.txt"), "text").unwrap();
        fs::write(tmp.path().join("image.png"), [0u8; 16]).unwrap();
        fs::create_dir_all(tmp.path().join("node_modules")).unwrap();
        fs::write(tmp.path().join("node_modules/dep.md"), "# dep").unwrap();
        fs::write(tmp.path().join("huge.md"), vec![b'x'; 2 * 1024 * 1024]).unwrap();

        let config = DiscoveryConfig {
            max_file_size_mb: 1,
            ..Default::default()
        };
        let result = walk(tmp.path(), &config).unwrap();

        let names: Vec<&str> = result
            .files
            .iter()
            .map(|f| f.relative_path.as_str())
            .collect();
        assert_eq!(names, vec!["notes.md", "readme.txt"]);
        assert_eq!(result.skips.too_large, 1);
    }

    #[test]
    fn walk_missing_root_is_not_found() {
        let config = DiscoveryConfig::default();
        let err = walk(Path::new("/definitely/not/here"), &config).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
