//! Query expansion: the set of query strings candidate generation runs.

use serde::Serialize;

use crate::clients::QueryRewrite;
use crate::text::{normalize, truncate_tokens};

use super::params::RankingParams;

/// Normalized query variants for one search call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryPlan {
    /// Normalized original query.
    pub original: String,
    /// Distinct variants, `original` first.
    pub variants: Vec<String>,
    /// Normalized phrases a result should contain.
    pub must: Vec<String>,
}

impl QueryPlan {
    /// Variants other than the original.
    pub fn extra_variants(&self) -> &[String] {
        self.variants.get(1..).unwrap_or(&[])
    }
}

/// Build the variant list: the original, a token-truncated copy, then
/// rewrite keywords and must phrases. Duplicates and empties are dropped
/// and the list is capped at `max_variants`.
pub fn expand_query(
    query: &str,
    rewrite: Option<&QueryRewrite>,
    params: &RankingParams,
) -> QueryPlan {
    let original = normalize(query);
    let mut variants: Vec<String> = Vec::new();
    let push = |v: String, variants: &mut Vec<String>| {
        if !v.is_empty() && variants.len() < params.max_variants.max(1) && !variants.contains(&v) {
            variants.push(v);
        }
    };

    push(original.clone(), &mut variants);
    push(truncate_tokens(&original, params.truncate_tokens), &mut variants);

    let mut must = Vec::new();
    if let Some(rw) = rewrite {
        for kw in &rw.keywords {
            push(normalize(kw), &mut variants);
        }
        for phrase in &rw.must {
            let phrase = normalize(phrase);
            if !phrase.is_empty() && !must.contains(&phrase) {
                must.push(phrase.clone());
            }
            push(phrase, &mut variants);
        }
    }

    QueryPlan {
        original,
        variants,
        must,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn original_and_truncated() {
        let params = RankingParams::default();
        let plan = expand_query("one two three four five six seven eight", None, &params);
        assert_eq!(plan.original, "one two three four five six seven eight");
        assert_eq!(plan.variants.len(), 2);
        assert_eq!(plan.variants[1], "one two three four five six");
        assert!(plan.must.is_empty());
    }

    #[test]
    fn short_query_dedups_truncation() {
        let plan = expand_query("React-State", None, &RankingParams::default());
        assert_eq!(plan.variants, vec!["react state".to_string()]);
        assert!(plan.extra_variants().is_empty());
    }

    #[test]
    fn rewrite_adds_keywords_and_must() {
        let rw = QueryRewrite {
            keywords: vec!["Redux".into(), "react state".into(), "".into()],
            must: vec!["State Management".into(), "state management".into()],
        };
        let plan = expand_query("react state", Some(&rw), &RankingParams::default());
        assert_eq!(plan.variants, vec!["react state", "redux", "state management"]);
        assert_eq!(plan.must, vec!["state management"]);
    }

    #[test]
    fn variants_are_capped() {
        let rw = QueryRewrite {
            keywords: (0..50).map(|i| format!("kw{}", i)).collect(),
            must: Vec::new(),
        };
        let plan = expand_query("query", Some(&rw), &RankingParams::default());
        assert_eq!(plan.variants.len(), 12);
        assert_eq!(plan.variants[0], "query");
    }
}
