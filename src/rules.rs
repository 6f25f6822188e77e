//! Query-name matching against the block-list and the override table.
//!
//! Both checks are total over any input string: an unrecognized name simply
//! falls through to upstream resolution.

use std::collections::HashMap;

use crate::config::{BlocklistSection, OverridesSection};
use crate::dns::normalize_name;

/// A single block-list entry, compiled once at startup.
///
/// Patterns containing `*` match the whole name with `*` spanning any run of
/// characters (including the empty run). Anything else matches by
/// containment anywhere in the name. This is deliberately loose matching,
/// not DNS-suffix matching.
enum BlockPattern {
    Literal(String),
    Glob {
        segments: Vec<String>,
        anchored_start: bool,
        anchored_end: bool,
    },
}

impl BlockPattern {
    fn compile(raw: &str) -> Self {
        let pattern = raw.trim().to_ascii_lowercase();
        if !pattern.contains('*') {
            return BlockPattern::Literal(pattern);
        }
        BlockPattern::Glob {
            anchored_start: !pattern.starts_with('*'),
            anchored_end: !pattern.ends_with('*'),
            segments: pattern
                .split('*')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            BlockPattern::Literal(literal) => name.contains(literal.as_str()),
            BlockPattern::Glob {
                segments,
                anchored_start,
                anchored_end,
            } => {
                let mut pos = 0;
                for (index, segment) in segments.iter().enumerate() {
                    if index == 0 && *anchored_start {
                        if !name.starts_with(segment.as_str()) {
                            return false;
                        }
                        pos = segment.len();
                        continue;
                    }
                    if index == segments.len() - 1 && *anchored_end {
                        return name.len() >= pos + segment.len()
                            && name.ends_with(segment.as_str());
                    }
                    match name[pos..].find(segment.as_str()) {
                        Some(found) => pos += found + segment.len(),
                        None => return false,
                    }
                }
                true
            }
        }
    }
}

/// Immutable matching tables shared by every request.
pub struct RuleSet {
    patterns: Vec<BlockPattern>,
    overrides: HashMap<String, Vec<String>>,
}

impl RuleSet {
    pub fn new(blocklist: &BlocklistSection, overrides: &OverridesSection) -> Self {
        Self {
            patterns: blocklist
                .patterns
                .iter()
                .map(|p| BlockPattern::compile(p))
                .collect(),
            overrides: overrides
                .hosts
                .iter()
                .map(|(name, addresses)| (normalize_name(name), addresses.clone()))
                .collect(),
        }
    }

    /// First matching pattern wins; the result is order-independent since
    /// only existence is reported.
    pub fn is_blocked(&self, name: &str) -> bool {
        let name = normalize_name(name);
        self.patterns.iter().any(|pattern| pattern.matches(&name))
    }

    /// Exact case-insensitive lookup; subdomains of an overridden name miss.
    pub fn override_for(&self, name: &str) -> Option<&[String]> {
        self.overrides
            .get(&normalize_name(name))
            .map(Vec::as_slice)
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_set(patterns: &[&str], hosts: &[(&str, &[&str])]) -> RuleSet {
        let blocklist = BlocklistSection {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        };
        let overrides = OverridesSection {
            ttl: 3600,
            hosts: hosts
                .iter()
                .map(|(name, addresses)| {
                    (
                        name.to_string(),
                        addresses.iter().map(|a| a.to_string()).collect(),
                    )
                })
                .collect(),
        };
        RuleSet::new(&blocklist, &overrides)
    }

    #[test]
    fn literal_pattern_matches_anywhere_in_name() {
        let rules = rule_set(&["tracking."], &[]);
        assert!(rules.is_blocked("tracking.ads.example.com"));
        assert!(rules.is_blocked("ads.tracking.example.com"));
        assert!(!rules.is_blocked("example.com"));
    }

    #[test]
    fn glob_pattern_anchors_over_whole_name() {
        let rules = rule_set(&["*.adnxs.com"], &[]);
        assert!(rules.is_blocked("secure.adnxs.com"));
        assert!(rules.is_blocked("a.b.adnxs.com"));
        assert!(!rules.is_blocked("adnxs.com"));
        assert!(!rules.is_blocked("adnxs.com.evil.test"));
    }

    #[test]
    fn glob_star_spans_empty_run() {
        let rules = rule_set(&["ads*.example.com"], &[]);
        assert!(rules.is_blocked("ads.example.com"));
        assert!(rules.is_blocked("ads-7.example.com"));
        assert!(!rules.is_blocked("ads.example.org"));
    }

    #[test]
    fn glob_with_middle_segment() {
        let rules = rule_set(&["*.metrics.*"], &[]);
        assert!(rules.is_blocked("cdn.metrics.example.com"));
        assert!(!rules.is_blocked("metrics.example.com"));
    }

    #[test]
    fn blocking_is_case_and_trailing_dot_insensitive() {
        let rules = rule_set(&["doubleclick.net"], &[]);
        assert!(rules.is_blocked("DoubleClick.NET"));
        assert!(rules.is_blocked("ads.doubleclick.net."));
    }

    #[test]
    fn empty_name_never_panics() {
        let rules = rule_set(&["*.adnxs.com", "tracking."], &[]);
        assert!(!rules.is_blocked(""));
        assert!(rules.override_for("").is_none());
    }

    #[test]
    fn override_lookup_is_exact_only() {
        let rules = rule_set(&[], &[("prothomalo.com", &["103.101.91.10"])]);
        assert_eq!(
            rules.override_for("prothomalo.com"),
            Some(&["103.101.91.10".to_string()][..])
        );
        assert!(rules.override_for("www.prothomalo.com").is_none());
        assert!(rules.override_for("prothomalo.com.bd").is_none());
    }

    #[test]
    fn override_lookup_ignores_case_and_trailing_dot() {
        let rules = rule_set(&[], &[("YouTube.com", &["180.87.36.25"])]);
        assert_eq!(
            rules.override_for("youtube.COM."),
            Some(&["180.87.36.25".to_string()][..])
        );
    }

    #[test]
    fn counts_reflect_table_sizes() {
        let rules = rule_set(
            &["a", "b*"],
            &[("x.com", &["10.0.0.1"]), ("y.com", &["10.0.0.2"])],
        );
        assert_eq!(rules.pattern_count(), 2);
        assert_eq!(rules.override_count(), 2);
    }
}
