//! Text normalization shared by the indexes and the ranking stages.
//!
//! Everything that compares a query against item text goes through
//! [`normalize`] first so that `react-state-management`,
//! `React State Management` and `react_state_management` are the same
//! string.

use std::collections::HashSet;

/// Lowercase, map non-alphanumerics to spaces, collapse whitespace.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Normalized tokens of `s`.
pub fn tokenize(s: &str) -> Vec<String> {
    normalize(s)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keep the first `n` whitespace tokens of an already-normalized string.
pub fn truncate_tokens(s: &str, n: usize) -> String {
    s.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

/// Keep at most `max_chars` characters, respecting char boundaries.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Fraction of distinct query tokens that appear in `text_tokens`.
pub fn token_overlap(query_tokens: &[String], text_tokens: &HashSet<&str>) -> f64 {
    let distinct: HashSet<&str> = query_tokens.iter().map(String::as_str).collect();
    if distinct.is_empty() {
        return 0.0;
    }
    let hits = distinct.iter().filter(|t| text_tokens.contains(*t)).count();
    hits as f64 / distinct.len() as f64
}

/// Token set view over a normalized string.
pub fn token_set(normalized: &str) -> HashSet<&str> {
    normalized.split(' ').filter(|t| !t.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_separators() {
        assert_eq!(normalize("react-state-management"), "react state management");
        assert_eq!(normalize("  React  State_Management!! "), "react state management");
        assert_eq!(normalize("owner/repo.js"), "owner repo js");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("---"), "");
    }

    #[test]
    fn tokenize_drops_empty() {
        assert_eq!(tokenize("a  b--c"), vec!["a", "b", "c"]);
        assert!(tokenize("  ").is_empty());
    }

    #[test]
    fn truncate_helpers() {
        assert_eq!(truncate_tokens("one two three four", 2), "one two");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn overlap_counts_distinct_tokens() {
        let q = tokenize("react react state");
        let text = normalize("State machines for React");
        let set = token_set(&text);
        assert!((token_overlap(&q, &set) - 1.0).abs() < 1e-9);

        let q = tokenize("react vue");
        assert!((token_overlap(&q, &set) - 0.5).abs() < 1e-9);
        assert_eq!(token_overlap(&[], &set), 0.0);
    }
}
