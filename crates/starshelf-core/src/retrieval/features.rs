//! Stage 2 feature scoring and the compound ranking order.

use std::cmp::Ordering;

use serde::Serialize;

use crate::models::{Item, ItemId};
use crate::text::{normalize, token_overlap, token_set, tokenize, truncate_chars};
use crate::vector::{dot, l2_distance, similarity};

use super::candidates::Candidate;
use super::expand::QueryPlan;
use super::params::RankingParams;

/// Tier used when the title does not match at all.
pub const NO_TITLE_MATCH: u8 = 5;

const MUST_TITLE_BONUS: f64 = 2.0;
const MUST_DESC_BONUS: f64 = 1.5;
const MUST_README_BONUS: f64 = 1.0;
const MUST_TAG_BONUS: f64 = 1.0;

/// Per-candidate scoring state for one search call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateState {
    pub id: ItemId,
    pub stage1: f64,
    pub hard_priority: u8,
    pub title: f64,
    pub desc: f64,
    pub readme: f64,
    pub code: f64,
    pub vector_similarity: Option<f64>,
    pub blended: f64,
    /// Position assigned by the reranker; `None` sorts after every rank.
    pub ai_rank: Option<usize>,
    pub first_seen: usize,
    pub forced: bool,
}

/// Query-side inputs shared by every candidate of one search.
pub struct QueryFeatures<'a> {
    plan: &'a QueryPlan,
    tokens: Vec<String>,
    vector: Option<&'a [f32]>,
}

impl<'a> QueryFeatures<'a> {
    pub fn new(plan: &'a QueryPlan, vector: Option<&'a [f32]>) -> Self {
        Self {
            plan,
            tokens: tokenize(&plan.original),
            vector,
        }
    }
}

/// Whether `needle` occurs in `haystack` on token boundaries. Both
/// strings must already be normalized.
pub fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}

/// Name-level match used by the force-include safety net: the name or
/// full name equals or contains `term`, or `term` mentions the name.
pub fn name_matches(name: &str, full_name: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    name == term
        || full_name == term
        || name.contains(term)
        || full_name.contains(term)
        || (name.len() >= 3 && contains_phrase(term, name))
}

fn title_score(name: &str, full: &str, q: &QueryFeatures<'_>) -> (f64, u8) {
    let original = q.plan.original.as_str();
    if original.is_empty() {
        return (0.0, NO_TITLE_MATCH);
    }
    if name == original || full == original {
        return (10.0, 0);
    }
    let extras = q.plan.extra_variants();
    if extras.iter().any(|v| name == v || full == v) {
        return (8.0, 1);
    }
    let terms = || std::iter::once(original).chain(extras.iter().map(String::as_str));
    if terms().any(|t| name.starts_with(t) || full.starts_with(t)) {
        return (6.0, 2);
    }
    if terms().any(|t| name_matches(name, full, t)) {
        return (4.5, 3);
    }
    let mut title_tokens = token_set(name);
    title_tokens.extend(token_set(full));
    let overlap = token_overlap(&q.tokens, &title_tokens);
    if overlap > 0.0 {
        return (overlap * 3.0, 4);
    }
    (0.0, NO_TITLE_MATCH)
}

fn text_score(text: &str, q: &QueryFeatures<'_>, substring: f64, overlap_weight: f64) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let mut score = 0.0;
    if contains_phrase(text, &q.plan.original) {
        score += substring;
    }
    score + token_overlap(&q.tokens, &token_set(text)) * overlap_weight
}

/// Compute the stage-2 state of one candidate.
pub fn score_features(
    candidate: &Candidate,
    item: &Item,
    q: &QueryFeatures<'_>,
    params: &RankingParams,
) -> CandidateState {
    let name = normalize(&item.name);
    let full = normalize(&item.full_name);
    let (title, mut tier) = title_score(&name, &full, q);
    let mut title = title.min(params.title_cap);

    let desc_text = normalize(&format!(
        "{} {}",
        item.description.as_deref().unwrap_or_default(),
        item.ai_summary.as_deref().unwrap_or_default()
    ));
    let mut desc = text_score(&desc_text, q, 3.0, 2.0).min(params.desc_cap);

    let readme_text = item
        .readme
        .as_deref()
        .map(|r| normalize(truncate_chars(r, params.readme_window)))
        .unwrap_or_default();
    let mut readme = text_score(&readme_text, q, 2.0, 1.5).min(params.readme_cap);

    let labels: Vec<&str> = item
        .ai_tags
        .iter()
        .chain(item.topics.iter())
        .map(String::as_str)
        .collect();
    let labels = normalize(&labels.join(" "));
    let sim = candidate.vector_similarity.or_else(|| match q.vector {
        Some(v) if !item.embedding.is_empty() && item.embedding.len() == v.len() => {
            Some(similarity(l2_distance(v, &item.embedding)))
        }
        _ => None,
    });
    let raw_dot = match q.vector {
        Some(v) if item.embedding.len() == v.len() => dot(v, &item.embedding) as f64,
        _ => 0.0,
    };
    let mut code =
        sim.unwrap_or(0.0) * 3.0 + raw_dot + token_overlap(&q.tokens, &token_set(&labels)) * 1.5;

    for phrase in &q.plan.must {
        if name == *phrase || full == *phrase {
            title += MUST_TITLE_BONUS;
            tier = tier.min(1);
        } else if name.contains(phrase.as_str()) || full.contains(phrase.as_str()) {
            title += MUST_TITLE_BONUS;
            tier = tier.min(3);
        }
        if contains_phrase(&desc_text, phrase) {
            desc += MUST_DESC_BONUS;
        }
        if contains_phrase(&readme_text, phrase) {
            readme += MUST_README_BONUS;
        }
        if contains_phrase(&labels, phrase) {
            code += MUST_TAG_BONUS;
        }
    }

    CandidateState {
        id: candidate.id,
        stage1: candidate.stage1,
        hard_priority: tier,
        title,
        desc,
        readme,
        code,
        vector_similarity: sim,
        blended: params.blend(candidate.stage1, title, desc, readme, code),
        ai_rank: None,
        first_seen: candidate.first_seen,
        forced: candidate.forced,
    }
}

fn rank_order(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// The compound ranking key: hard priority, title, description, readme,
/// code, AI rank, blended, stage 1, first seen.
pub fn compare_candidates(a: &CandidateState, b: &CandidateState) -> Ordering {
    a.hard_priority
        .cmp(&b.hard_priority)
        .then_with(|| b.title.total_cmp(&a.title))
        .then_with(|| b.desc.total_cmp(&a.desc))
        .then_with(|| b.readme.total_cmp(&a.readme))
        .then_with(|| b.code.total_cmp(&a.code))
        .then_with(|| rank_order(a.ai_rank, b.ai_rank))
        .then_with(|| b.blended.total_cmp(&a.blended))
        .then_with(|| b.stage1.total_cmp(&a.stage1))
        .then_with(|| a.first_seen.cmp(&b.first_seen))
}
