//! Adaptive content truncation policy.
//!
//! Query text is classified against an ordered rule table (first match
//! wins) to pick a character budget: content-focused queries get a high
//! limit, overview/metadata queries a low one, everything else a medium
//! default. A caller-supplied override replaces the computed limit,
//! including an explicit unlimited value that disables truncation entirely.
//! This is a best-effort heuristic for bandwidth-constrained callers, not a
//! correctness mechanism — full content is always reachable through the
//! natural-key lookup.

use regex::Regex;
use std::sync::OnceLock;

/// Which rule family picked the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    ContentFocused,
    Overview,
    Balanced,
    UserOverride,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ContentFocused => "content-focused",
            Strategy::Overview => "overview",
            Strategy::Balanced => "balanced",
            Strategy::UserOverride => "user-override",
        }
    }
}

/// A character budget, or none at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Chars(usize),
    Unlimited,
}

#[derive(Debug, Clone, Copy)]
pub struct TruncationDecision {
    pub strategy: Strategy,
    pub limit: Limit,
    pub reason: &'static str,
}

pub const CONTENT_FOCUSED_LIMIT: usize = 400;
pub const OVERVIEW_LIMIT: usize = 80;
pub const BALANCED_LIMIT: usize = 150;

struct Rule {
    strategy: Strategy,
    limit: usize,
    pattern: &'static str,
    reason: &'static str,
}

/// The declared rule table, checked top to bottom against the uppercased
/// query text. Order matters: content-focused before overview before
/// balanced.
static RULES: [Rule; 11] = [
    Rule {
        strategy: Strategy::ContentFocused,
        limit: CONTENT_FOCUSED_LIMIT,
        pattern: r"SELECT\b.*\bCONTENT\b.*\bFROM\b",
        reason: "content field projected",
    },
    Rule {
        strategy: Strategy::ContentFocused,
        limit: CONTENT_FOCUSED_LIMIT,
        pattern: r"WHERE\b.*\bCONTENT\b.*\bLIKE\b",
        reason: "substring predicate on content",
    },
    Rule {
        strategy: Strategy::ContentFocused,
        limit: CONTENT_FOCUSED_LIMIT,
        pattern: r"\bCONTENT\b.*\bMATCH\b",
        reason: "match predicate on content",
    },
    Rule {
        strategy: Strategy::Overview,
        limit: OVERVIEW_LIMIT,
        pattern: r"\bCOUNT\s*\(",
        reason: "aggregate count",
    },
    Rule {
        strategy: Strategy::Overview,
        limit: OVERVIEW_LIMIT,
        pattern: r"^\s*PRAGMA\b",
        reason: "structural introspection",
    },
    Rule {
        strategy: Strategy::Overview,
        limit: OVERVIEW_LIMIT,
        pattern: r"\bSQLITE_MASTER\b",
        reason: "structural introspection",
    },
    Rule {
        strategy: Strategy::Overview,
        limit: OVERVIEW_LIMIT,
        pattern: r"\bLIMIT\s+[1-5]\b",
        reason: "small explicit result cap",
    },
    Rule {
        strategy: Strategy::Balanced,
        limit: BALANCED_LIMIT,
        pattern: r"SELECT\b.*\bTITLE\b.*\bFROM\b",
        reason: "title projection",
    },
    Rule {
        strategy: Strategy::Balanced,
        limit: BALANCED_LIMIT,
        pattern: r"SELECT\b.*\bSUMMARY\b.*\bFROM\b",
        reason: "summary projection",
    },
    Rule {
        strategy: Strategy::Balanced,
        limit: BALANCED_LIMIT,
        pattern: r"ORDER\s+BY\b",
        reason: "ordered listing",
    },
    Rule {
        strategy: Strategy::Balanced,
        limit: BALANCED_LIMIT,
        pattern: r"GROUP\s+BY\b",
        reason: "grouped listing",
    },
];

fn compiled_rules() -> &'static Vec<(Regex, &'static Rule)> {
    static COMPILED: OnceLock<Vec<(Regex, &'static Rule)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|rule| (Regex::new(rule.pattern).expect("valid rule pattern"), rule))
            .collect()
    })
}

/// Classify query text into a truncation decision. First matching rule
/// wins; no match falls through to the balanced default.
pub fn classify(query_text: &str) -> TruncationDecision {
    let upper = query_text.trim().to_uppercase();

    for (regex, rule) in compiled_rules() {
        if regex.is_match(&upper) {
            return TruncationDecision {
                strategy: rule.strategy,
                limit: Limit::Chars(rule.limit),
                reason: rule.reason,
            };
        }
    }

    TruncationDecision {
        strategy: Strategy::Balanced,
        limit: Limit::Chars(BALANCED_LIMIT),
        reason: "default",
    }
}

/// Classification plus caller override: an explicit limit replaces the
/// computed one entirely.
pub fn decide(query_text: &str, override_limit: Option<Limit>) -> TruncationDecision {
    match override_limit {
        Some(limit) => TruncationDecision {
            strategy: Strategy::UserOverride,
            limit,
            reason: "caller-supplied limit",
        },
        None => classify(query_text),
    }
}

/// Truncate one value to the limit, preferring a word boundary within the
/// last 20% of the budget. Cuts are always on char boundaries; a cut value
/// gets a `...` continuation marker.
pub fn truncate_value(value: &str, limit: Limit) -> (String, bool) {
    let max = match limit {
        Limit::Unlimited => return (value.to_string(), false),
        Limit::Chars(n) => n,
    };

    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= max {
        return (value.to_string(), false);
    }

    let mut cut = max;
    if max > 20 {
        let floor = (max as f64 * 0.8) as usize;
        let mut pos = max;
        while pos > floor && chars[pos] != ' ' {
            pos -= 1;
        }
        if pos > floor {
            cut = pos;
        }
    }

    let mut out: String = chars[..cut].iter().collect();
    out.push_str("...");
    (out, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_projection_is_content_focused() {
        let d = classify("SELECT content FROM discussions");
        assert_eq!(d.strategy, Strategy::ContentFocused);
        assert_eq!(d.limit, Limit::Chars(400));
    }

    #[test]
    fn count_is_overview() {
        let d = classify("SELECT COUNT(*) FROM discussions");
        assert_eq!(d.strategy, Strategy::Overview);
        assert_eq!(d.limit, Limit::Chars(80));
    }

    #[test]
    fn title_summary_ordering_is_balanced() {
        let d = classify("SELECT title, summary FROM discussions ORDER BY created_at");
        assert_eq!(d.strategy, Strategy::Balanced);
        assert_eq!(d.limit, Limit::Chars(150));
    }

    #[test]
    fn content_like_predicate_is_content_focused() {
        let d = classify("SELECT uuid FROM artifacts WHERE content LIKE '%pool%'");
        assert_eq!(d.strategy, Strategy::ContentFocused);
    }

    #[test]
    fn pragma_and_schema_probes_are_overview() {
        assert_eq!(classify("PRAGMA table_info(plans)").strategy, Strategy::Overview);
        assert_eq!(
            classify("SELECT name FROM sqlite_master WHERE type='table'").strategy,
            Strategy::Overview
        );
    }

    #[test]
    fn small_explicit_cap_is_overview_but_large_is_not() {
        assert_eq!(classify("SELECT * FROM plans LIMIT 3").strategy, Strategy::Overview);
        assert_eq!(classify("SELECT * FROM plans LIMIT 15").strategy, Strategy::Balanced);
    }

    #[test]
    fn free_text_defaults_to_balanced() {
        let d = classify("connection pool retry");
        assert_eq!(d.strategy, Strategy::Balanced);
        assert_eq!(d.limit, Limit::Chars(150));
    }

    #[test]
    fn override_beats_classification() {
        let d = decide("SELECT content FROM discussions", Some(Limit::Unlimited));
        assert_eq!(d.strategy, Strategy::UserOverride);
        assert_eq!(d.limit, Limit::Unlimited);
    }

    #[test]
    fn unlimited_never_truncates() {
        let long = "x".repeat(10_000);
        let (out, cut) = truncate_value(&long, Limit::Unlimited);
        assert_eq!(out.len(), 10_000);
        assert!(!cut);
    }

    #[test]
    fn within_limit_is_unchanged() {
        let (out, cut) = truncate_value("short", Limit::Chars(150));
        assert_eq!(out, "short");
        assert!(!cut);
    }

    #[test]
    fn cuts_at_word_boundary_in_last_fifth() {
        // 30-char budget; a space sits at char 27, inside the last 20%
        let value = "aaaa bbbb cccc dddd eeee ff gggg hhhh";
        let (out, cut) = truncate_value(value, Limit::Chars(30));
        assert!(cut);
        assert_eq!(out, "aaaa bbbb cccc dddd eeee ff...");
    }

    #[test]
    fn hard_cut_when_no_boundary_in_window() {
        let value = "a".repeat(100);
        let (out, cut) = truncate_value(&value, Limit::Chars(40));
        assert!(cut);
        assert_eq!(out.chars().count(), 43); // 40 + "..."
    }

    #[test]
    fn multibyte_content_cuts_on_char_boundary() {
        let value = "é".repeat(300);
        let (out, cut) = truncate_value(&value, Limit::Chars(150));
        assert!(cut);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), 153);
    }
}
