//! Field-boosted lexical index.
//!
//! [`LexicalEngine`] is the seam the retrieval engine searches through;
//! [`FieldIndex`] is the engine shipped with starshelf. It keeps an
//! inverted index from normalized term to per-field term frequencies and
//! scores matches with BM25 saturation, multiplied by a fixed boost per
//! field:
//!
//! | Field | Boost |
//! |-------|-------|
//! | name | 6.0 |
//! | full name | 4.5 |
//! | AI tags, topics | 3.0 |
//! | AI summary | 2.0 |
//! | description | 1.5 |
//! | readme | 1.0 |
//!
//! # Match modes
//!
//! | Mode | Combine | Prefix | Fuzzy edits |
//! |------|---------|--------|-------------|
//! | `strict` | AND | yes | none |
//! | `balanced` | OR | yes | `⌊len × 0.2⌋` (max 2) for terms of 4+ chars |
//! | `broad` | OR | yes | `⌊len × 0.35⌋` (max 3) for terms of 3+ chars |
//!
//! Strict mode can return nothing where balanced would match; retrying is
//! left to the caller (see [`crate::retrieval`]).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::error;

use crate::models::{Item, ItemId};
use crate::text::{tokenize, truncate_chars};

const PREFIX_WEIGHT: f64 = 0.6;
const FUZZY_WEIGHT: f64 = 0.45;
const MAX_EXPANSIONS: usize = 64;
const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// How loosely query terms are matched and combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LexicalMode {
    Strict,
    Balanced,
    Broad,
}

impl LexicalMode {
    fn requires_all_terms(self) -> bool {
        matches!(self, LexicalMode::Strict)
    }

    /// Maximum edit distance tolerated for a query term of `len` chars.
    pub fn max_edits(self, len: usize) -> usize {
        match self {
            LexicalMode::Strict => 0,
            LexicalMode::Balanced if len >= 4 => ((len as f64 * 0.2) as usize).min(2),
            LexicalMode::Broad if len >= 3 => ((len as f64 * 0.35) as usize).min(3),
            _ => 0,
        }
    }
}

impl fmt::Display for LexicalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LexicalMode::Strict => "strict",
            LexicalMode::Balanced => "balanced",
            LexicalMode::Broad => "broad",
        };
        f.write_str(s)
    }
}

impl FromStr for LexicalMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "strict" => Ok(LexicalMode::Strict),
            "balanced" => Ok(LexicalMode::Balanced),
            "broad" => Ok(LexicalMode::Broad),
            other => anyhow::bail!(
                "Unknown lexical mode: {}. Use strict, balanced, or broad.",
                other
            ),
        }
    }
}

/// A lexical hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: ItemId,
    pub score: f64,
}

/// Pluggable lexical engine.
pub trait LexicalEngine: Send + Sync {
    /// Index `items`. With `reset`, everything previously indexed is dropped first.
    fn build(&mut self, items: &[Item], reset: bool);
    /// Replace whatever was indexed for `item.id` with the current item.
    fn upsert(&mut self, item: &Item);
    fn remove(&mut self, ids: &[ItemId]);
    /// Ranked hits, best first, ties broken by id.
    fn search(&self, query: &str, mode: LexicalMode, limit: usize) -> Vec<ScoredId>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn contains(&self, id: ItemId) -> bool;
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Name,
    FullName,
    Tags,
    Topics,
    Summary,
    Description,
    Readme,
}

const FIELD_COUNT: usize = 7;
const FIELDS: [Field; FIELD_COUNT] = [
    Field::Name,
    Field::FullName,
    Field::Tags,
    Field::Topics,
    Field::Summary,
    Field::Description,
    Field::Readme,
];

impl Field {
    fn boost(self) -> f64 {
        match self {
            Field::Name => 6.0,
            Field::FullName => 4.5,
            Field::Tags | Field::Topics => 3.0,
            Field::Summary => 2.0,
            Field::Description => 1.5,
            Field::Readme => 1.0,
        }
    }
}

type FieldCounts = [u32; FIELD_COUNT];

/// In-memory inverted index over item text fields.
pub struct FieldIndex {
    postings: BTreeMap<String, HashMap<ItemId, FieldCounts>>,
    /// Distinct terms indexed per item, used to drop its postings.
    doc_terms: HashMap<ItemId, Vec<String>>,
    doc_lengths: HashMap<ItemId, FieldCounts>,
    total_lengths: [u64; FIELD_COUNT],
    readme_window: usize,
}

impl FieldIndex {
    pub fn new() -> Self {
        Self::with_readme_window(4000)
    }

    /// Only the first `chars` characters of a readme are indexed.
    pub fn with_readme_window(chars: usize) -> Self {
        Self {
            postings: BTreeMap::new(),
            doc_terms: HashMap::new(),
            doc_lengths: HashMap::new(),
            total_lengths: [0; FIELD_COUNT],
            readme_window: chars,
        }
    }

    /// Number of terms holding a posting for `id`.
    pub fn posting_count(&self, id: ItemId) -> usize {
        self.postings
            .values()
            .filter(|posting| posting.contains_key(&id))
            .count()
    }

    fn field_tokens(&self, item: &Item, field: Field) -> Vec<String> {
        match field {
            Field::Name => tokenize(&item.name),
            Field::FullName => tokenize(&item.full_name),
            Field::Tags => item.ai_tags.iter().flat_map(|t| tokenize(t)).collect(),
            Field::Topics => item.topics.iter().flat_map(|t| tokenize(t)).collect(),
            Field::Summary => item.ai_summary.as_deref().map(tokenize).unwrap_or_default(),
            Field::Description => item.description.as_deref().map(tokenize).unwrap_or_default(),
            Field::Readme => item
                .readme
                .as_deref()
                .map(|r| tokenize(truncate_chars(r, self.readme_window)))
                .unwrap_or_default(),
        }
    }

    fn insert(&mut self, item: &Item) {
        let mut counts: HashMap<String, FieldCounts> = HashMap::new();
        let mut lengths: FieldCounts = [0; FIELD_COUNT];

        for (slot, field) in FIELDS.iter().enumerate() {
            let tokens = self.field_tokens(item, *field);
            lengths[slot] = tokens.len() as u32;
            for token in tokens {
                counts.entry(token).or_insert([0; FIELD_COUNT])[slot] += 1;
            }
        }

        let mut terms: Vec<String> = Vec::with_capacity(counts.len());
        for (term, tf) in counts {
            let posting = self.postings.entry(term.clone()).or_default();
            if posting.insert(item.id, tf).is_some() {
                error!(
                    item_id = item.id,
                    term = %term,
                    "invariant violation: duplicate lexical posting"
                );
            }
            terms.push(term);
        }

        for (slot, len) in lengths.iter().enumerate() {
            self.total_lengths[slot] += *len as u64;
        }
        self.doc_lengths.insert(item.id, lengths);
        self.doc_terms.insert(item.id, terms);
    }

    fn remove_one(&mut self, id: ItemId) {
        let Some(terms) = self.doc_terms.remove(&id) else {
            return;
        };
        for term in terms {
            if let Some(posting) = self.postings.get_mut(&term) {
                posting.remove(&id);
                if posting.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        if let Some(lengths) = self.doc_lengths.remove(&id) {
            for (slot, len) in lengths.iter().enumerate() {
                self.total_lengths[slot] = self.total_lengths[slot].saturating_sub(*len as u64);
            }
        }
    }

    /// Index terms matching `query_term` under `mode`, with their match weight.
    fn expand_term(&self, query_term: &str, mode: LexicalMode) -> Vec<(&str, f64)> {
        let mut out: Vec<(&str, f64)> = Vec::new();

        if let Some((term, _)) = self.postings.get_key_value(query_term) {
            out.push((term.as_str(), 1.0));
        }

        let q_len = query_term.chars().count();
        if q_len >= 2 {
            let prefixed = self
                .postings
                .range::<str, _>((
                    std::ops::Bound::Excluded(query_term),
                    std::ops::Bound::Unbounded,
                ))
                .take_while(|(term, _)| term.starts_with(query_term))
                .take(MAX_EXPANSIONS);
            for (term, _) in prefixed {
                out.push((term.as_str(), PREFIX_WEIGHT));
            }
        }

        let max_edits = mode.max_edits(q_len);
        if max_edits > 0 {
            let mut fuzzy = 0;
            for term in self.postings.keys() {
                if fuzzy >= MAX_EXPANSIONS {
                    break;
                }
                if term == query_term || term.starts_with(query_term) {
                    continue;
                }
                let t_len = term.chars().count();
                if t_len.abs_diff(q_len) > max_edits {
                    continue;
                }
                if let Some(d) = bounded_levenshtein(query_term, term, max_edits) {
                    let weight = FUZZY_WEIGHT * (1.0 - d as f64 / (q_len as f64 + 1.0));
                    out.push((term.as_str(), weight));
                    fuzzy += 1;
                }
            }
        }

        out
    }

    fn field_score(&self, tf: &FieldCounts, lengths: &FieldCounts) -> f64 {
        let n_docs = self.doc_lengths.len().max(1) as f64;
        let mut score = 0.0;
        for (slot, field) in FIELDS.iter().enumerate() {
            if tf[slot] == 0 {
                continue;
            }
            let avg = (self.total_lengths[slot] as f64 / n_docs).max(1.0);
            let f = tf[slot] as f64;
            let norm = 1.0 - BM25_B + BM25_B * (lengths[slot] as f64 / avg);
            score += field.boost() * (f * (BM25_K1 + 1.0)) / (f + BM25_K1 * norm);
        }
        score
    }
}

impl Default for FieldIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalEngine for FieldIndex {
    fn build(&mut self, items: &[Item], reset: bool) {
        if reset {
            self.postings.clear();
            self.doc_terms.clear();
            self.doc_lengths.clear();
            self.total_lengths = [0; FIELD_COUNT];
        }
        for item in items {
            self.upsert(item);
        }
    }

    fn upsert(&mut self, item: &Item) {
        self.remove_one(item.id);
        self.insert(item);
    }

    fn remove(&mut self, ids: &[ItemId]) {
        for id in ids {
            self.remove_one(*id);
        }
    }

    fn search(&self, query: &str, mode: LexicalMode, limit: usize) -> Vec<ScoredId> {
        let mut query_terms = tokenize(query);
        let mut seen = std::collections::HashSet::new();
        query_terms.retain(|t| seen.insert(t.clone()));
        if query_terms.is_empty() || limit == 0 {
            return Vec::new();
        }

        let n_docs = self.doc_lengths.len() as f64;
        let mut scores: HashMap<ItemId, (f64, usize)> = HashMap::new();

        for query_term in &query_terms {
            let mut per_doc: HashMap<ItemId, f64> = HashMap::new();
            for (term, weight) in self.expand_term(query_term, mode) {
                let Some(posting) = self.postings.get(term) else {
                    continue;
                };
                let df = posting.len() as f64;
                let idf = (1.0 + (n_docs - df + 0.5) / (df + 0.5)).ln();
                for (id, tf) in posting {
                    let Some(lengths) = self.doc_lengths.get(id) else {
                        continue;
                    };
                    let s = weight * idf * self.field_score(tf, lengths);
                    let best = per_doc.entry(*id).or_insert(0.0);
                    if s > *best {
                        *best = s;
                    }
                }
            }
            for (id, s) in per_doc {
                let entry = scores.entry(id).or_insert((0.0, 0));
                entry.0 += s;
                entry.1 += 1;
            }
        }

        let required = query_terms.len();
        let mut hits: Vec<ScoredId> = scores
            .into_iter()
            .filter(|(_, (_, matched))| !mode.requires_all_terms() || *matched == required)
            .map(|(id, (score, _))| ScoredId { id, score })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        hits.truncate(limit);
        hits
    }

    fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    fn contains(&self, id: ItemId) -> bool {
        self.doc_lengths.contains_key(&id)
    }
}

/// Levenshtein distance between `a` and `b`, or `None` if it exceeds `max`.
pub fn bounded_levenshtein(a: &str, b: &str, max: usize) -> Option<usize> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > max {
        return None;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
            row_min = row_min.min(curr[j + 1]);
        }
        if row_min > max {
            return None;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let d = prev[b.len()];
    (d <= max).then_some(d)
}
