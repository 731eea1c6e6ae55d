//! Application wiring.
//!
//! [`AppContext::open`] is the one place where the concrete store, index
//! worker, clients and services are assembled. Commands and the server
//! receive the finished context.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use starshelf_core::clients::{AiClient, SourceClient};
use starshelf_core::error::is_version_mismatch;
use starshelf_core::index::{IndexBackend, SearchIndexes};
use starshelf_core::retrieval::RetrievalEngine;
use starshelf_core::store::{ItemStore, VECTOR_SNAPSHOT};

use crate::ai::create_client;
use crate::config::Config;
use crate::db;
use crate::enrich::{EnrichSettings, EnrichmentService};
use crate::github::GithubClient;
use crate::migrate;
use crate::progress::{EnrichProgressReporter, NoProgress};
use crate::sqlite_store::SqliteStore;
use crate::worker::{IndexHandle, IndexWorker};

pub type Retrieval = RetrievalEngine<SqliteStore, IndexHandle>;
pub type Enrichment = EnrichmentService<SqliteStore, IndexHandle>;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub indexes: Arc<IndexHandle>,
    pub source: Arc<dyn SourceClient>,
    pub ai: Arc<dyn AiClient>,
    pub retrieval: Retrieval,
    pub enrichment: Arc<Enrichment>,
}

impl AppContext {
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with_progress(config, Arc::new(NoProgress)).await
    }

    pub async fn open_with_progress(
        config: Config,
        progress: Arc<dyn EnrichProgressReporter>,
    ) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));

        let indexes = Arc::new(IndexWorker::spawn(SearchIndexes::default())?);
        load_indexes(&*store, &*indexes).await?;

        let source: Arc<dyn SourceClient> = Arc::new(GithubClient::new(&config.github)?);
        let ai = create_client(&config.ai)?;

        let retrieval = RetrievalEngine::new(
            store.clone(),
            indexes.clone(),
            config.ai.is_enabled().then(|| ai.clone()),
            config.retrieval.ranking.clone(),
        );
        let enrichment = Arc::new(EnrichmentService::new(
            store.clone(),
            source.clone(),
            ai.clone(),
            indexes.clone(),
            EnrichSettings::from(&config.enrichment),
        )
        .with_progress(progress));

        Ok(Self {
            config,
            store,
            indexes,
            source,
            ai,
            retrieval,
            enrichment,
        })
    }

    /// Rebuild both indexes from the store, e.g. after an import.
    pub async fn reload_indexes(&self) -> Result<()> {
        load_indexes(&*self.store, &*self.indexes).await
    }
}

/// Fill the indexes from the store.
///
/// Both indexes are cleared and the persisted vector snapshot is restored.
/// Snapshot vectors for ids the store no longer has are dropped, and every
/// item is then indexed on top, which picks up embeddings written after the
/// snapshot was taken.
/// A missing or foreign snapshot means a full rebuild, after which a fresh
/// snapshot is saved.
pub async fn load_indexes<S, I>(store: &S, indexes: &I) -> Result<()>
where
    S: ItemStore + ?Sized,
    I: IndexBackend + ?Sized,
{
    let items = store.list_items().await?;
    indexes.build(Vec::new(), true).await?;
    let restored = match store.load_snapshot(VECTOR_SNAPSHOT).await? {
        Some(snapshot) => match indexes.restore(snapshot).await {
            Ok(()) => true,
            Err(e) if is_version_mismatch(&e) => {
                warn!("{:#}; rebuilding vector index", e);
                false
            }
            Err(e) => return Err(e),
        },
        None => false,
    };

    let mut stale = 0;
    if restored {
        let keep = items.iter().map(|i| i.id).collect();
        stale = indexes.retain_vectors(keep).await?.len();
        if stale > 0 {
            warn!(stale, "snapshot held vectors for items no longer stored");
        }
    }

    indexes.build(items, false).await?;
    let stats = indexes.stats().await?;

    if (!restored || stale > 0) && stats.vectors > 0 {
        let snapshot = indexes.snapshot().await?;
        store.save_snapshot(VECTOR_SNAPSHOT, &snapshot).await?;
    }
    info!(
        docs = stats.lexical_docs,
        vectors = stats.vectors,
        restored,
        "indexes loaded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use starshelf_core::index::{IndexSnapshot, LocalIndexes};
    use starshelf_core::models::Item;
    use starshelf_core::store::MemoryStore;

    fn embedded(id: i64, name: &str) -> Item {
        let mut item = Item::new(id, "acme", name);
        item.embedding = vec![id as f32, 1.0];
        item
    }

    #[tokio::test]
    async fn missing_snapshot_rebuilds_and_saves() {
        let store = MemoryStore::with_items(vec![embedded(1, "one"), embedded(2, "two")]);
        let indexes = LocalIndexes::default();
        load_indexes(&store, &indexes).await.unwrap();

        let stats = indexes.stats().await.unwrap();
        assert_eq!(stats.lexical_docs, 2);
        assert_eq!(stats.vectors, 2);
        assert!(store.load_snapshot(VECTOR_SNAPSHOT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn foreign_snapshot_is_replaced() {
        let store = MemoryStore::with_items(vec![embedded(1, "one")]);
        let foreign = IndexSnapshot {
            version: "hnsw-v0".into(),
            data: br#"{"version":"hnsw-v0","dims":2,"entries":[]}"#.to_vec(),
        };
        store.save_snapshot(VECTOR_SNAPSHOT, &foreign).await.unwrap();

        let indexes = LocalIndexes::default();
        load_indexes(&store, &indexes).await.unwrap();

        assert_eq!(indexes.stats().await.unwrap().vectors, 1);
        let saved = store.load_snapshot(VECTOR_SNAPSHOT).await.unwrap().unwrap();
        assert_ne!(saved, foreign);
    }

    #[tokio::test]
    async fn snapshot_restore_then_items_on_top() {
        let store = MemoryStore::with_items(vec![embedded(1, "one")]);
        let first = LocalIndexes::default();
        load_indexes(&store, &first).await.unwrap();

        store.upsert_item(&embedded(2, "two")).await.unwrap();
        let second = LocalIndexes::default();
        load_indexes(&store, &second).await.unwrap();
        assert_eq!(second.stats().await.unwrap().vectors, 2);
    }

    #[tokio::test]
    async fn snapshot_vectors_for_removed_items_are_dropped() {
        let store = MemoryStore::with_items(vec![embedded(1, "one"), embedded(2, "two")]);
        load_indexes(&store, &LocalIndexes::default()).await.unwrap();

        // Item 2 leaves the store but the saved snapshot still has it.
        store.remove_items(&[2]).await.unwrap();
        let indexes = LocalIndexes::default();
        load_indexes(&store, &indexes).await.unwrap();

        let stats = indexes.stats().await.unwrap();
        assert_eq!(stats.vectors, 1);
        assert_eq!(stats.lexical_docs, 1);
        let hits = indexes.vector_search(vec![2.0, 1.0], 5).await.unwrap();
        assert!(hits.iter().all(|h| h.id == 1), "{:?}", hits);

        let resaved = store.load_snapshot(VECTOR_SNAPSHOT).await.unwrap().unwrap();
        let fresh = LocalIndexes::default();
        fresh.restore(resaved).await.unwrap();
        assert_eq!(fresh.stats().await.unwrap().vectors, 1);
    }
}
