use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use starshelf_core::clients::{AiClient, EnrichRequest, EnrichResult, QueryRewrite, RankCandidate};
use starshelf_core::error::{is_auth_error, ShelfError};
use starshelf_core::index::{IndexBackend, LocalIndexes};
use starshelf_core::models::{Item, ItemId};
use starshelf_core::retrieval::{RankingParams, RetrievalEngine, RetrievalOptions};
use starshelf_core::store::{ItemStore, MemoryStore};

/// Scripted AI double: fixed query embeddings, optional rewrite and rank
/// answers, and a switch to fail every call.
#[derive(Default)]
struct ScriptedAi {
    embeddings: HashMap<String, Vec<f32>>,
    rewrite: Option<QueryRewrite>,
    ranking: Option<Vec<ItemId>>,
    failure: Option<ShelfError>,
    rank_calls: Mutex<usize>,
}

impl ScriptedAi {
    fn fail(&self) -> Result<()> {
        match &self.failure {
            Some(e) => Err(e.clone().into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AiClient for ScriptedAi {
    async fn summarize_and_tag(&self, _batch: &[EnrichRequest]) -> Result<Vec<EnrichResult>> {
        self.fail()?;
        Ok(Vec::new())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.fail()?;
        Ok(self.embeddings.get(text).cloned().unwrap_or_default())
    }

    async fn rewrite_query(&self, _query: &str) -> Result<QueryRewrite> {
        self.fail()?;
        Ok(self.rewrite.clone().unwrap_or_default())
    }

    async fn rank_candidates(
        &self,
        _query: &str,
        _candidates: &[RankCandidate],
        _top_k: usize,
    ) -> Result<Vec<ItemId>> {
        self.fail()?;
        *self.rank_calls.lock().unwrap() += 1;
        Ok(self.ranking.clone().unwrap_or_default())
    }
}

type Engine = RetrievalEngine<MemoryStore, LocalIndexes>;

async fn engine(items: Vec<Item>, ai: Option<Arc<dyn AiClient>>) -> Engine {
    let store = Arc::new(MemoryStore::with_items(items.clone()));
    let indexes = Arc::new(LocalIndexes::default());
    indexes.build(items, true).await.unwrap();
    RetrievalEngine::new(store, indexes, ai, RankingParams::default())
}

fn repo(id: ItemId, name: &str, description: &str) -> Item {
    let mut item = Item::new(id, "someone", name);
    item.description = Some(description.to_string());
    item
}

fn opts() -> RetrievalOptions {
    RetrievalOptions {
        rewrite: true,
        rerank: true,
        explain: true,
        limit: 117,
    }
}

fn ids(outcome: &starshelf_core::retrieval::SearchOutcome) -> Vec<ItemId> {
    outcome.items.iter().map(|r| r.item.id).collect()
}

fn react_catalog() -> Vec<Item> {
    let mut items = vec![repo(1, "react-state-management", "Notes")];
    for i in 0..10 {
        let mut item = repo(100 + i, &format!("ui-kit-{}", i), "react components, react hooks");
        item.readme = Some(
            "react state management with react hooks. react react react state management guide."
                .repeat(5),
        );
        item.ai_summary = Some("React state management toolkit for react apps".into());
        items.push(item);
    }
    items
}

#[tokio::test]
async fn exact_name_ranks_first_over_readme_heavy_matches() {
    let mut items = react_catalog();
    for item in items.iter_mut().skip(1) {
        item.embedding = vec![1.0, 0.0];
    }
    let ai = ScriptedAi {
        embeddings: HashMap::from([("react state management".to_string(), vec![1.0, 0.0])]),
        ..Default::default()
    };
    let engine = engine(items, Some(Arc::new(ai))).await;
    let outcome = engine.search("react state management", &opts()).await.unwrap();

    assert!(!outcome.reset);
    assert_eq!(outcome.items.len(), 11);
    let first = &outcome.items[0];
    assert_eq!(first.item.id, 1);
    let explain = first.explain.as_ref().unwrap();
    assert_eq!(explain.hard_priority, 0);

    // The readme-heavy matches carry the stronger vector signal.
    let others: Vec<_> = outcome.items[1..]
        .iter()
        .filter_map(|r| r.explain.as_ref())
        .collect();
    assert!(others.iter().all(|e| e.hard_priority > 0));
    assert!(others.iter().all(|e| e.code > explain.code));
    assert!(others.iter().all(|e| e.readme > explain.readme));
}

#[tokio::test]
async fn tier_zero_never_ranks_below_worse_tiers() {
    let engine = engine(react_catalog(), None).await;
    let outcome = engine.search("react-state-management", &opts()).await.unwrap();
    let tiers: Vec<u8> = outcome
        .items
        .iter()
        .map(|r| r.explain.as_ref().unwrap().hard_priority)
        .collect();
    let mut sorted = tiers.clone();
    sorted.sort();
    assert_eq!(tiers, sorted);
    assert_eq!(tiers[0], 0);
}

#[tokio::test]
async fn vector_similarity_alone_includes_item() {
    let mut items: Vec<Item> = (0..20)
        .map(|i| repo(i, &format!("tool-{}", i), "a graph database engine"))
        .collect();
    let mut semantic = repo(500, "nebula", "distributed storage for connected records");
    semantic.embedding = vec![1.0, 0.111, 0.0];
    items.push(semantic);
    for item in items.iter_mut().take(20) {
        item.embedding = vec![-1.0, 0.0, 1.0];
    }

    let ai = ScriptedAi {
        embeddings: HashMap::from([("graph database".to_string(), vec![1.0, 0.0, 0.0])]),
        ..Default::default()
    };
    let engine = engine(items, Some(Arc::new(ai))).await;
    let outcome = engine.search("graph database", &opts()).await.unwrap();

    let hit = outcome
        .items
        .iter()
        .find(|r| r.item.id == 500)
        .expect("vector-only item in results");
    let explain = hit.explain.as_ref().unwrap();
    assert_eq!(explain.title, 0.0);
    assert_eq!(explain.desc, 0.0);
    let sim = explain.vector_similarity.unwrap();
    assert!((sim - 0.9).abs() < 0.01, "similarity {}", sim);
    assert!(explain.code > 2.5);
}

#[tokio::test]
async fn ranking_is_deterministic() {
    let mut items = react_catalog();
    for i in 0..30 {
        items.push(repo(200 + i, &format!("state-lib-{}", i), "state container"));
    }
    let engine = engine(items, None).await;
    let first = ids(&engine.search("state management", &opts()).await.unwrap());
    for _ in 0..5 {
        let again = ids(&engine.search("state management", &opts()).await.unwrap());
        assert_eq!(first, again);
    }
}

#[tokio::test]
async fn empty_query_resets_to_full_catalog() {
    let engine = engine(react_catalog(), None).await;
    let outcome = engine.search("  --  ", &opts()).await.unwrap();
    assert!(outcome.reset);
    assert_eq!(outcome.items.len(), 11);
    assert!(outcome.items.iter().all(|r| r.explain.is_none()));
}

#[tokio::test]
async fn strict_miss_falls_back_to_fuzzy_match() {
    let engine = engine(vec![repo(1, "widget", "react component library")], None).await;
    let outcome = engine.search("reactt", &opts()).await.unwrap();
    assert_eq!(ids(&outcome), vec![1]);
}

#[tokio::test]
async fn name_safety_net_includes_unindexed_item() {
    let store = Arc::new(MemoryStore::with_items(vec![repo(7, "tokio", "runtime")]));
    // Index left empty on purpose.
    let indexes = Arc::new(LocalIndexes::default());
    let engine = RetrievalEngine::new(store, indexes, None, RankingParams::default());
    let outcome = engine.search("tokio", &opts()).await.unwrap();
    assert_eq!(ids(&outcome), vec![7]);
    let explain = outcome.items[0].explain.as_ref().unwrap();
    assert!(explain.forced);
    assert_eq!(explain.hard_priority, 0);
}

#[tokio::test]
async fn rerank_orders_ties_and_keeps_unranked_after() {
    let items = vec![
        repo(1, "widget-a", ""),
        repo(2, "widget-b", ""),
        repo(3, "widget-c", ""),
    ];
    let ai = Arc::new(ScriptedAi {
        ranking: Some(vec![3, 1]),
        ..Default::default()
    });
    let engine = engine(items, Some(ai.clone())).await;
    let outcome = engine.search("widget", &opts()).await.unwrap();
    assert_eq!(ids(&outcome), vec![3, 1, 2]);
    assert_eq!(outcome.items[0].explain.as_ref().unwrap().ai_rank, Some(0));
    assert_eq!(outcome.items[2].explain.as_ref().unwrap().ai_rank, None);
    assert_eq!(*ai.rank_calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn rewrite_keywords_are_searched() {
    let items = vec![repo(1, "zustand", "bear necessities"), repo(2, "other", "nothing")];
    let ai = ScriptedAi {
        rewrite: Some(QueryRewrite {
            keywords: vec!["zustand".into()],
            must: Vec::new(),
        }),
        ..Default::default()
    };
    let engine = engine(items, Some(Arc::new(ai))).await;
    let outcome = engine.search("tiny state library", &opts()).await.unwrap();
    assert_eq!(outcome.variants, vec!["tiny state library", "zustand"]);
    assert_eq!(ids(&outcome)[0], 1);
    assert_eq!(outcome.items[0].explain.as_ref().unwrap().hard_priority, 1);
}

#[tokio::test]
async fn transient_ai_failures_degrade() {
    let ai = ScriptedAi {
        failure: Some(ShelfError::TransientNetwork("timeout".into())),
        ..Default::default()
    };
    let engine = engine(react_catalog(), Some(Arc::new(ai))).await;
    let outcome = engine.search("react state management", &opts()).await.unwrap();
    assert_eq!(ids(&outcome)[0], 1);
}

#[tokio::test]
async fn auth_failures_are_surfaced() {
    let ai = ScriptedAi {
        failure: Some(ShelfError::Auth("bad key".into())),
        ..Default::default()
    };
    let engine = engine(react_catalog(), Some(Arc::new(ai))).await;
    let err = engine
        .search("react state management", &opts())
        .await
        .unwrap_err();
    assert!(is_auth_error(&err));
}

#[tokio::test]
async fn limit_truncates_results() {
    let engine = engine(react_catalog(), None).await;
    let mut o = opts();
    o.limit = 3;
    let outcome = engine.search("react", &o).await.unwrap();
    assert_eq!(outcome.items.len(), 3);
    let store_items = MemoryStore::with_items(react_catalog()).list_items().await.unwrap();
    assert_eq!(store_items.len(), 11);
}
