//! Item extraction from note text.
//!
//! Turns free-form markdown/plain text into candidate items using structural
//! cues: section headers become pattern/rule artifacts, checkbox and status
//! markers become progress entries, `Decision:` markers become decisions.
//! Each candidate carries a natural key (its title or summary) and a content
//! signature so the sync engine can match it across runs.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::models::{CandidateItem, ItemKind};

/// Hash of whitespace-normalized content, used for change detection.
///
/// Runs of whitespace collapse to a single space before hashing, so
/// formatting-only edits (re-wrapping, indentation, line endings) do not
/// register as changes. Truncated to 16 hex chars.
pub fn content_signature(content: &str) -> String {
    let normalized = normalize_whitespace(content);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Collapse all whitespace runs to single spaces and trim.
pub fn normalize_whitespace(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A markdown section: header text plus the body up to the next header.
#[derive(Debug, Clone)]
pub struct Section {
    pub title: String,
    pub content: String,
}

/// Split content into sections at markdown headers. Text before the first
/// header becomes a section with an empty title.
pub fn split_into_sections(content: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section {
        title: String::new(),
        content: String::new(),
    };

    for line in content.lines() {
        if line.starts_with('#') {
            if !current.title.is_empty() || !current.content.trim().is_empty() {
                sections.push(current);
            }
            current = Section {
                title: line.trim_start_matches('#').trim().to_string(),
                content: String::new(),
            };
        } else {
            current.content.push_str(line);
            current.content.push('\n');
        }
    }

    if !current.title.is_empty() || !current.content.trim().is_empty() {
        sections.push(current);
    }

    sections
}

fn checkbox_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-*]\s*\[([xX ])\]\s*(.+)$").expect("valid regex"))
}

fn status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:\s*[-*]\s*|#{1,3}\s*)(TODO|DONE|IN PROGRESS|BLOCKED):\s*(.+)$")
            .expect("valid regex")
    })
}

fn decision_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:#{1,3}\s*|\*\*|\s*[-*]\s*)Decision:\**\s*(.+?)\**\s*$")
            .expect("valid regex")
    })
}

/// Extract progress entries (checkbox and status markers) as discussion
/// candidates. Up to three following plain lines provide context.
pub fn extract_progress(content: &str) -> Vec<CandidateItem> {
    let lines: Vec<&str> = content.lines().collect();
    let mut items = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let (summary, implemented) = if let Some(caps) = checkbox_re().captures(line) {
            let done = caps.get(1).map(|m| m.as_str() != " ").unwrap_or(false);
            (caps[2].trim().to_string(), Some(done))
        } else if let Some(caps) = status_re().captures(line) {
            let done = caps[1].eq_ignore_ascii_case("DONE");
            (caps[2].trim().to_string(), Some(done))
        } else {
            continue;
        };

        let context = following_plain_lines(&lines, idx + 1, 3);
        let content = if context.is_empty() {
            summary.clone()
        } else {
            context.join("\n")
        };

        items.push(CandidateItem {
            kind: ItemKind::Discussion,
            tags: extract_tags(&summary),
            signature: content_signature(&content),
            natural_key: summary,
            content,
            implemented,
        });
    }

    items
}

/// Extract `Decision:` entries as discussion candidates with unknown
/// implementation state; up to five following plain lines form the
/// rationale.
pub fn extract_decisions(content: &str) -> Vec<CandidateItem> {
    let lines: Vec<&str> = content.lines().collect();
    let mut items = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = decision_re().captures(line) else {
            continue;
        };
        let summary = caps[1].trim().to_string();
        let rationale = following_plain_lines(&lines, idx + 1, 5);
        let content = if rationale.is_empty() {
            summary.clone()
        } else {
            rationale.join("\n")
        };

        items.push(CandidateItem {
            kind: ItemKind::Discussion,
            tags: extract_tags(&summary),
            signature: content_signature(&content),
            natural_key: summary,
            content,
            implemented: None,
        });
    }

    items
}

/// Extract pattern/component sections as artifact candidates.
///
/// A section qualifies if its title names a pattern-like concept, or if it
/// carries substantial content.
pub fn extract_patterns(content: &str) -> Vec<CandidateItem> {
    const PATTERN_KEYWORDS: [&str; 5] = ["pattern", "template", "component", "approach", "method"];

    split_into_sections(content)
        .into_iter()
        .filter(|s| !s.title.is_empty() && !s.content.trim().is_empty())
        .filter(|s| {
            let title = s.title.to_lowercase();
            PATTERN_KEYWORDS.iter().any(|k| title.contains(k)) || s.content.trim().len() > 100
        })
        .map(|s| {
            let body = s.content.trim().to_string();
            CandidateItem {
                kind: ItemKind::Artifact,
                tags: extract_tags(&format!("{} {}", s.title, body)),
                signature: content_signature(&body),
                natural_key: s.title,
                content: body,
                implemented: None,
            }
        })
        .collect()
}

/// Extract rule sections as artifact candidates titled `Rule: <section>`.
/// A file with no headers yields one rule holding the whole content.
pub fn extract_rules(content: &str, filename: &str) -> Vec<CandidateItem> {
    let mut rules: Vec<CandidateItem> = split_into_sections(content)
        .into_iter()
        .filter(|s| !s.title.is_empty() && !s.content.trim().is_empty())
        .map(|s| {
            let body = s.content.trim().to_string();
            let mut tags = extract_tags(&format!("{} {}", s.title, body));
            if !tags.iter().any(|t| t == "rules") {
                tags.push("rules".to_string());
            }
            CandidateItem {
                kind: ItemKind::Artifact,
                natural_key: format!("Rule: {}", s.title),
                signature: content_signature(&body),
                content: body,
                tags,
                implemented: None,
            }
        })
        .collect();

    if rules.is_empty() && !content.trim().is_empty() {
        let body = content.trim().to_string();
        rules.push(CandidateItem {
            kind: ItemKind::Artifact,
            natural_key: format!("Rules from {}", filename),
            signature: content_signature(&body),
            content: body,
            tags: vec!["rules".to_string()],
            implemented: None,
        });
    }

    rules
}

/// Extract every candidate item from one source file.
///
/// The filename steers extraction: progress/journal files yield progress
/// entries and decisions, pattern files yield artifacts, rule files yield
/// rules. Anything else is classified by counting structural cues in the
/// content.
pub fn extract_items(relative_path: &str, content: &str) -> Vec<CandidateItem> {
    let name = relative_path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(relative_path)
        .to_lowercase();

    if name.contains("rule") {
        return extract_rules(content, relative_path);
    }
    if name.contains("pattern") || name.contains("template") || name.contains("architecture") {
        return extract_patterns(content);
    }
    if name.contains("progress") || name.contains("status") {
        let mut items = extract_progress(content);
        items.extend(extract_decisions(content));
        return items;
    }
    if name.contains("journal") || name.contains("notes") || name.contains("log") {
        let mut items = extract_decisions(content);
        items.extend(extract_progress(content));
        return items;
    }

    match classify_content(content, &name) {
        ContentShape::Artifacts => extract_patterns(content),
        ContentShape::Discussions => {
            let mut items = extract_progress(content);
            items.extend(extract_decisions(content));
            items
        }
        ContentShape::Mixed => {
            let mut items = extract_progress(content);
            items.extend(extract_decisions(content));
            items.extend(extract_patterns(content));
            items
        }
    }
}

/// Rough shape of a file, used to pick the extraction approach when the
/// filename gives no hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentShape {
    Artifacts,
    Discussions,
    Mixed,
}

pub fn classify_content(content: &str, filename: &str) -> ContentShape {
    let lower = content.to_lowercase();

    let code_blocks = content.matches("```").count();
    let task_items = content
        .lines()
        .filter(|l| checkbox_re().is_match(l))
        .count();
    let decision_markers = lower.matches("decision").count()
        + lower.matches("todo").count()
        + lower.matches("done").count();
    let sections = content
        .lines()
        .filter(|l| l.starts_with('#'))
        .count();

    let mut artifact_score = 0;
    let mut discussion_score = 0;

    if code_blocks > 2 {
        artifact_score += 3;
    }
    if sections > 3 {
        artifact_score += 1;
    }
    if lower.contains("component") || lower.contains("class") {
        artifact_score += 2;
    }

    if task_items > 0 {
        discussion_score += 3;
    }
    if decision_markers > 2 {
        discussion_score += 3;
    }
    if filename.contains("meeting") || filename.contains("standup") {
        discussion_score += 2;
    }

    if artifact_score > discussion_score + 1 {
        ContentShape::Artifacts
    } else if discussion_score > artifact_score + 1 {
        ContentShape::Discussions
    } else {
        ContentShape::Mixed
    }
}

/// Pull recognizable technology/methodology keywords out of text as tags.
/// Returns at most five, deduplicated, in first-seen order.
pub fn extract_tags(text: &str) -> Vec<String> {
    const KEYWORDS: [&str; 20] = [
        "rust", "python", "javascript", "sql", "sqlite", "api", "database", "frontend",
        "backend", "cli", "config", "security", "performance", "testing", "deployment",
        "pattern", "template", "documentation", "refactor", "migration",
    ];

    let lower = text.to_lowercase();
    let mut tags: Vec<String> = KEYWORDS
        .iter()
        .filter(|k| lower.contains(*k))
        .map(|k| k.to_string())
        .collect();

    if lower.contains("todo") || lower.contains("task") {
        tags.push("task".to_string());
    }
    if lower.contains("bug") || lower.contains("fix") {
        tags.push("bugfix".to_string());
    }
    if lower.contains("feature") {
        tags.push("feature".to_string());
    }

    tags.dedup();
    tags.truncate(5);
    tags
}

fn following_plain_lines(lines: &[&str], start: usize, max: usize) -> Vec<String> {
    lines
        .iter()
        .skip(start)
        .take(max)
        .map(|l| l.trim())
        .take_while(|l| !l.is_empty() && !l.starts_with(['#', '-', '*']))
        .map(|l| l.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_ignores_formatting_noise() {
        let a = content_signature("Decided   to use\nSQLite for storage");
        let b = content_signature("Decided to use SQLite   for storage\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn signature_detects_content_change() {
        let a = content_signature("use SQLite");
        let b = content_signature("use Postgres");
        assert_ne!(a, b);
    }

    #[test]
    fn checkbox_items_carry_done_state() {
        let content = "# Progress\n- [x] Wire up the pool\n- [ ] Add retries\n";
        let items = extract_progress(content);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].natural_key, "Wire up the pool");
        assert_eq!(items[0].implemented, Some(true));
        assert_eq!(items[1].implemented, Some(false));
    }

    #[test]
    fn status_markers_are_progress_items() {
        let content = "- TODO: write docs\n## DONE: ship v0.2\n";
        let items = extract_progress(content);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].implemented, Some(false));
        assert_eq!(items[1].implemented, Some(true));
        assert_eq!(items[1].natural_key, "ship v0.2");
    }

    #[test]
    fn decisions_pick_up_rationale() {
        let content = "## Decision: switch to WAL mode\nReaders stop blocking writers.\nNo downside for our workload.\n\n- unrelated bullet\n";
        let items = extract_decisions(content);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].natural_key, "switch to WAL mode");
        assert!(items[0].content.contains("Readers stop blocking"));
        assert_eq!(items[0].implemented, None);
    }

    #[test]
    fn sections_split_at_headers() {
        let content = "intro text\n# One\nbody one\n## Two\nbody two\n";
        let sections = split_into_sections(content);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].title, "");
        assert_eq!(sections[1].title, "One");
        assert_eq!(sections[2].title, "Two");
        assert!(sections[2].content.contains("body two"));
    }

    #[test]
    fn pattern_sections_become_artifacts() {
        let content = "# Connection pool pattern\nUse a bounded pool, five connections, WAL mode.\n";
        let items = extract_patterns(content);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, ItemKind::Artifact);
        assert_eq!(items[0].natural_key, "Connection pool pattern");
    }

    #[test]
    fn rules_fall_back_to_whole_file() {
        let items = extract_rules("always run fmt before committing", "team_rules.md");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].natural_key, "Rules from team_rules.md");
        assert!(items[0].tags.contains(&"rules".to_string()));
    }

    #[test]
    fn filename_steers_extraction() {
        let progress = "- [x] done thing\n";
        let items = extract_items("notes/progress.md", progress);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, ItemKind::Discussion);

        let rules = extract_items("global_rules.md", "# Style\nuse rustfmt\n");
        assert!(rules.iter().all(|i| i.kind == ItemKind::Artifact));
        assert!(rules[0].natural_key.starts_with("Rule:"));
    }

    #[test]
    fn tags_are_bounded_and_deduped() {
        let tags = extract_tags("SQLite database testing with sqlite performance api cli tags");
        assert!(tags.len() <= 5);
        let mut unique = tags.clone();
        unique.dedup();
        assert_eq!(tags, unique);
    }
}
