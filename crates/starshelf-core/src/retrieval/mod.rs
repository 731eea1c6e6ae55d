//! Hybrid retrieval: lexical and vector candidates fused, re-scored on
//! item features, and optionally reordered by an AI ranking model.
//!
//! # Pipeline
//!
//! ```text
//! query ─► expand ─► stage 1 (lexical plans + vector + name safety net)
//!                 ─► stage 2 (title / desc / readme / code features)
//!                 ─► stage 3 (optional AI rerank) ─► ranked items
//! ```
//!
//! Every call builds its own [`CandidateSet`]; nothing is shared between
//! concurrent searches. Ordering is fully determined by the compound key
//! in [`compare_candidates`], whose final tie-break is first-seen order.

pub mod candidates;
pub mod expand;
pub mod features;
pub mod params;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clients::{AiClient, QueryRewrite, RankCandidate};
use crate::error::is_auth_error;
use crate::index::IndexBackend;
use crate::lexical::LexicalMode;
use crate::models::{Item, ItemId};
use crate::store::ItemStore;
use crate::text::normalize;
use crate::vector::similarity;

pub use candidates::{normalize_scores, Candidate, CandidateSet};
pub use expand::{expand_query, QueryPlan};
pub use features::{compare_candidates, score_features, CandidateState, QueryFeatures};
pub use params::{LexicalPlan, RankingParams};

/// Per-call switches.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    /// Ask the AI client for query variants.
    pub rewrite: bool,
    /// Ask the AI client to reorder the stage-2 survivors.
    pub rerank: bool,
    /// Attach the score breakdown to every result.
    pub explain: bool,
    pub limit: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            rewrite: true,
            rerank: true,
            explain: false,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedItem {
    pub item: Item,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<CandidateState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub items: Vec<RankedItem>,
    /// True when the query was empty and `items` is the unranked catalog.
    pub reset: bool,
    /// Query variants that were searched.
    pub variants: Vec<String>,
}

/// The retrieval service. Store, indexes and the optional AI client are
/// injected so tests can substitute doubles.
pub struct RetrievalEngine<S, I> {
    store: Arc<S>,
    indexes: Arc<I>,
    ai: Option<Arc<dyn AiClient>>,
    params: RankingParams,
}

impl<S: ItemStore, I: IndexBackend> RetrievalEngine<S, I> {
    pub fn new(
        store: Arc<S>,
        indexes: Arc<I>,
        ai: Option<Arc<dyn AiClient>>,
        params: RankingParams,
    ) -> Self {
        Self {
            store,
            indexes,
            ai,
            params,
        }
    }

    pub fn params(&self) -> &RankingParams {
        &self.params
    }

    pub async fn search(&self, query: &str, opts: &RetrievalOptions) -> Result<SearchOutcome> {
        if normalize(query).is_empty() {
            let items = self.store.list_items().await?;
            return Ok(SearchOutcome {
                items: items
                    .into_iter()
                    .map(|item| RankedItem {
                        item,
                        explain: None,
                    })
                    .collect(),
                reset: true,
                variants: Vec::new(),
            });
        }

        let rewrite = if opts.rewrite {
            self.rewrite(query).await?
        } else {
            None
        };
        let plan = expand_query(query, rewrite.as_ref(), &self.params);
        let query_vec = self.embed_query(query).await?;

        let catalog = self.store.list_items().await?;
        let candidates = self.generate(&plan, query_vec.as_deref(), &catalog).await?;
        debug!(candidates = candidates.len(), variants = plan.variants.len(), "stage 1 complete");

        let by_id: HashMap<ItemId, &Item> = catalog.iter().map(|i| (i.id, i)).collect();
        let q = QueryFeatures::new(&plan, query_vec.as_deref());
        let mut states: Vec<CandidateState> = candidates
            .top_n(self.params.stage1_keep)
            .iter()
            .filter_map(|c| by_id.get(&c.id).map(|item| score_features(c, item, &q, &self.params)))
            .collect();
        states.sort_by(compare_candidates);
        states.truncate(self.params.stage2_keep);

        if opts.rerank {
            self.rerank(query, &mut states, &by_id).await?;
        }

        states.truncate(opts.limit);
        let items = states
            .into_iter()
            .filter_map(|state| {
                by_id.get(&state.id).map(|item| RankedItem {
                    item: (*item).clone(),
                    explain: opts.explain.then_some(state),
                })
            })
            .collect();

        Ok(SearchOutcome {
            items,
            reset: false,
            variants: plan.variants,
        })
    }

    /// Stage 1: run every lexical plan and the vector search, then add
    /// name matches the engines may have missed.
    async fn generate(
        &self,
        plan: &QueryPlan,
        query_vec: Option<&[f32]>,
        catalog: &[Item],
    ) -> Result<CandidateSet> {
        let mut set = CandidateSet::new();

        for (i, variant) in plan.variants.iter().enumerate() {
            let plans = if i == 0 {
                &self.params.original_plans
            } else {
                &self.params.variant_plans
            };
            for lp in plans {
                let mut hits = self.indexes.lexical_search(variant, lp.mode, lp.limit).await?;
                if hits.is_empty() && lp.mode == LexicalMode::Strict {
                    hits = self
                        .indexes
                        .lexical_search(variant, LexicalMode::Balanced, lp.limit)
                        .await?;
                }
                let scored: Vec<(ItemId, f64)> = hits.iter().map(|h| (h.id, h.score)).collect();
                set.accumulate(lp.weight, &scored, &self.params);
            }
        }

        if let Some(vector) = query_vec {
            let neighbors = self
                .indexes
                .vector_search(vector.to_vec(), self.params.vector_k)
                .await?;
            let scored: Vec<(ItemId, f64)> = neighbors
                .iter()
                .map(|n| (n.id, similarity(n.distance)))
                .collect();
            for (id, sim) in &scored {
                set.record_similarity(*id, *sim);
            }
            set.accumulate(self.params.vector_weight, &scored, &self.params);
        }

        for item in catalog {
            let name = normalize(&item.name);
            let full = normalize(&item.full_name);
            if plan
                .variants
                .iter()
                .any(|v| features::name_matches(&name, &full, v))
            {
                set.force_include(item.id);
            }
        }

        Ok(set)
    }

    async fn rewrite(&self, query: &str) -> Result<Option<QueryRewrite>> {
        let Some(ai) = &self.ai else {
            return Ok(None);
        };
        match ai.rewrite_query(query).await {
            Ok(rw) => Ok(Some(rw)),
            Err(e) if is_auth_error(&e) => Err(e),
            Err(e) => {
                warn!(error = %e, "query rewrite failed; searching the original query only");
                Ok(None)
            }
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Option<Vec<f32>>> {
        let Some(ai) = &self.ai else {
            return Ok(None);
        };
        match ai.embed(query).await {
            Ok(v) if !v.is_empty() => Ok(Some(v)),
            Ok(_) => Ok(None),
            Err(e) if is_auth_error(&e) => Err(e),
            Err(e) => {
                warn!(error = %e, "query embedding failed; skipping vector search");
                Ok(None)
            }
        }
    }

    /// Stage 3: assign AI ranks and re-sort. Ids the model did not return
    /// keep `ai_rank = None`.
    async fn rerank(
        &self,
        query: &str,
        states: &mut [CandidateState],
        by_id: &HashMap<ItemId, &Item>,
    ) -> Result<()> {
        let Some(ai) = &self.ai else {
            return Ok(());
        };
        if states.is_empty() {
            return Ok(());
        }
        let batch: Vec<RankCandidate> = states
            .iter()
            .filter_map(|s| by_id.get(&s.id).map(|item| RankCandidate::from(*item)))
            .collect();
        let ranked = match ai.rank_candidates(query, &batch, batch.len()).await {
            Ok(ids) => ids,
            Err(e) if is_auth_error(&e) => return Err(e),
            Err(e) => {
                warn!(error = %e, "rerank failed; keeping feature order");
                return Ok(());
            }
        };

        let mut positions: HashMap<ItemId, usize> = HashMap::new();
        for id in ranked {
            let next = positions.len();
            positions.entry(id).or_insert(next);
        }
        for state in states.iter_mut() {
            state.ai_rank = positions.get(&state.id).copied();
        }
        states.sort_by(compare_candidates);
        Ok(())
    }
}
