//! Tunable ranking coefficients.
//!
//! Every number the ranking stages use lives here so it can be overridden
//! from the `[retrieval]` config section. The defaults are empirically
//! tuned and validated against the ranking scenarios in the test suite.

use serde::{Deserialize, Serialize};

use crate::lexical::LexicalMode;

/// One lexical search issued during candidate generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LexicalPlan {
    pub mode: LexicalMode,
    pub weight: f64,
    pub limit: usize,
}

impl LexicalPlan {
    pub const fn new(mode: LexicalMode, weight: f64, limit: usize) -> Self {
        Self { mode, weight, limit }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingParams {
    /// Share of a stage-1 contribution taken from the normalized score.
    pub score_blend: f64,
    /// Share of a stage-1 contribution taken from the rank position.
    pub rank_blend: f64,

    pub stage1_weight: f64,
    pub title_weight: f64,
    pub desc_weight: f64,
    pub readme_weight: f64,
    pub code_weight: f64,

    pub title_cap: f64,
    pub desc_cap: f64,
    pub readme_cap: f64,

    pub max_variants: usize,
    pub truncate_tokens: usize,
    /// Characters of readme considered by readme scoring.
    pub readme_window: usize,

    pub vector_k: usize,
    pub vector_weight: f64,
    pub stage1_keep: usize,
    pub stage2_keep: usize,

    /// Plans run against the normalized original query.
    pub original_plans: Vec<LexicalPlan>,
    /// Plans run against every other variant.
    pub variant_plans: Vec<LexicalPlan>,
}

impl Default for RankingParams {
    fn default() -> Self {
        Self {
            score_blend: 0.75,
            rank_blend: 0.25,
            stage1_weight: 14.0,
            title_weight: 2.5,
            desc_weight: 1.2,
            readme_weight: 0.9,
            code_weight: 1.0,
            title_cap: 10.0,
            desc_cap: 4.0,
            readme_cap: 3.0,
            max_variants: 12,
            truncate_tokens: 6,
            readme_window: 4000,
            vector_k: 500,
            vector_weight: 1.1,
            stage1_keep: 30_000,
            stage2_keep: 117,
            original_plans: vec![
                LexicalPlan::new(LexicalMode::Strict, 1.0, 250),
                LexicalPlan::new(LexicalMode::Balanced, 0.7, 400),
                LexicalPlan::new(LexicalMode::Broad, 0.45, 600),
            ],
            variant_plans: vec![
                LexicalPlan::new(LexicalMode::Strict, 0.6, 150),
                LexicalPlan::new(LexicalMode::Balanced, 0.4, 250),
            ],
        }
    }
}

impl RankingParams {
    /// Stage-2 blended score from the individual components.
    pub fn blend(&self, stage1: f64, title: f64, desc: f64, readme: f64, code: f64) -> f64 {
        stage1 * self.stage1_weight
            + title * self.title_weight
            + desc * self.desc_weight
            + readme * self.readme_weight
            + code * self.code_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_override_keeps_defaults() {
        let params: RankingParams = serde_json::from_str(r#"{"stage2_keep": 50}"#).unwrap();
        assert_eq!(params.stage2_keep, 50);
        assert_eq!(params.stage1_keep, 30_000);
        assert_eq!(params.original_plans.len(), 3);
    }

    #[test]
    fn blend_uses_multipliers() {
        let p = RankingParams::default();
        let b = p.blend(1.0, 1.0, 1.0, 1.0, 1.0);
        assert!((b - (14.0 + 2.5 + 1.2 + 0.9 + 1.0)).abs() < 1e-9);
    }
}
