//! Stage 1 accumulator.
//!
//! A [`CandidateSet`] is created fresh for every search call. Each hit list
//! (one lexical plan, or the vector search) adds a weighted, rank-blended
//! contribution to the candidates it contains.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::ItemId;

use super::params::RankingParams;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: ItemId,
    pub stage1: f64,
    /// Insertion order, the final tie-break.
    pub first_seen: usize,
    /// Added by the name-match safety net; never dropped by stage 1.
    pub forced: bool,
    /// `1 / (1 + distance)` when the vector search returned this id.
    pub vector_similarity: Option<f64>,
}

#[derive(Debug, Default)]
pub struct CandidateSet {
    positions: HashMap<ItemId, usize>,
    entries: Vec<Candidate>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&Candidate> {
        self.positions.get(&id).map(|&pos| &self.entries[pos])
    }

    fn entry(&mut self, id: ItemId) -> &mut Candidate {
        let next = self.entries.len();
        let pos = *self.positions.entry(id).or_insert(next);
        if pos == next {
            self.entries.push(Candidate {
                id,
                stage1: 0.0,
                first_seen: next,
                forced: false,
                vector_similarity: None,
            });
        }
        &mut self.entries[pos]
    }

    /// Add one ranked hit list. `hits` must be ordered best first.
    ///
    /// Each hit contributes
    /// `weight * (score_blend * normalized + rank_blend * (1 - rank / total))`.
    pub fn accumulate(&mut self, weight: f64, hits: &[(ItemId, f64)], params: &RankingParams) {
        if hits.is_empty() {
            return;
        }
        let scores: Vec<f64> = hits.iter().map(|(_, s)| *s).collect();
        let normalized = normalize_scores(&scores);
        let total = hits.len() as f64;
        for (rank, ((id, _), norm)) in hits.iter().zip(normalized).enumerate() {
            let positional = 1.0 - rank as f64 / total;
            let contribution =
                weight * (params.score_blend * norm + params.rank_blend * positional);
            self.entry(*id).stage1 += contribution;
        }
    }

    pub fn record_similarity(&mut self, id: ItemId, similarity: f64) {
        let candidate = self.entry(id);
        let best = candidate.vector_similarity.map_or(similarity, |s| s.max(similarity));
        candidate.vector_similarity = Some(best);
    }

    pub fn force_include(&mut self, id: ItemId) {
        self.entry(id).forced = true;
    }

    /// The best `n` candidates by stage-1 score (ties by first seen),
    /// plus every forced candidate.
    pub fn top_n(self, n: usize) -> Vec<Candidate> {
        let mut entries = self.entries;
        entries.sort_by(stage1_order);
        let mut kept = 0usize;
        entries.retain(|c| {
            if kept < n {
                kept += 1;
                true
            } else {
                c.forced
            }
        });
        entries
    }
}

fn stage1_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.stage1
        .total_cmp(&a.stage1)
        .then(a.first_seen.cmp(&b.first_seen))
}

/// Min-max normalize to `[0, 1]`. A list whose scores are all equal
/// normalizes to all ones.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let s_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    scores
        .iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}
