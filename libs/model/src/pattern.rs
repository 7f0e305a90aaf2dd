//! Namespace selection by name glob.
//!
//! The managed namespace set is derived on every pass by matching these
//! patterns against the platform's live namespace listing; it is never
//! cached. Supports `*` (any sequence) and `?` (any single character),
//! and a comma-separated list of alternatives (e.g. `*-cicd,build-*`).

use crate::error::ModelError;

/// A parsed set of namespace name globs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacePattern {
    patterns: Vec<String>,
}

impl NamespacePattern {
    /// Parse a comma-separated pattern list. Entries are trimmed; an empty
    /// list or empty entry is rejected.
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let patterns: Vec<String> = raw
            .split(',')
            .map(|p| p.trim().to_string())
            .collect();

        if patterns.is_empty() || patterns.iter().any(|p| p.is_empty()) {
            return Err(ModelError::EmptyPattern);
        }

        Ok(Self { patterns })
    }

    /// Whether `namespace` matches any of the patterns.
    pub fn matches(&self, namespace: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| wildcard_match(pattern, namespace))
    }

    pub fn as_slice(&self) -> &[String] {
        &self.patterns
    }
}

impl std::fmt::Display for NamespacePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.patterns.join(","))
    }
}

/// Iterative glob match with `*` backtracking.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            // Let the last `*` swallow one more character.
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_suffix_glob() {
        let pattern = NamespacePattern::parse("*-cicd").unwrap();
        assert!(pattern.matches("team-a-cicd"));
        assert!(pattern.matches("-cicd"));
        assert!(!pattern.matches("team-a"));
        assert!(!pattern.matches("cicd-team-a"));
    }

    #[test]
    fn test_question_mark() {
        let pattern = NamespacePattern::parse("team-?-cicd").unwrap();
        assert!(pattern.matches("team-a-cicd"));
        assert!(!pattern.matches("team-ab-cicd"));
    }

    #[test]
    fn test_pattern_list() {
        let pattern = NamespacePattern::parse("*-cicd, build-*").unwrap();
        assert!(pattern.matches("team-a-cicd"));
        assert!(pattern.matches("build-infra"));
        assert!(!pattern.matches("prod"));
    }

    #[test]
    fn test_literal_pattern() {
        let pattern = NamespacePattern::parse("ci").unwrap();
        assert!(pattern.matches("ci"));
        assert!(!pattern.matches("cicd"));
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(NamespacePattern::parse(""), Err(ModelError::EmptyPattern));
        assert_eq!(
            NamespacePattern::parse("*-cicd,,x"),
            Err(ModelError::EmptyPattern)
        );
    }

    proptest! {
        #[test]
        fn prop_star_matches_everything(ns in "[a-z0-9-]{0,40}") {
            let pattern = NamespacePattern::parse("*").unwrap();
            prop_assert!(pattern.matches(&ns));
        }

        #[test]
        fn prop_exact_name_matches_itself(ns in "[a-z][a-z0-9-]{0,40}") {
            let pattern = NamespacePattern::parse(&ns).unwrap();
            prop_assert!(pattern.matches(&ns));
        }
    }
}
