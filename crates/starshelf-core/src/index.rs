//! Index backend: both engines behind one request/response interface.
//!
//! Index work is expressed as plain-data [`IndexRequest`] values answered
//! by [`IndexResponse`] values. [`SearchIndexes::handle`] executes a
//! request synchronously; an [`IndexBackend`] decides *where* that
//! happens. [`LocalIndexes`] runs it in-process behind a lock, while the
//! application crate ships a worker that runs it on a dedicated thread.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::lexical::{FieldIndex, LexicalEngine, LexicalMode, ScoredId};
use crate::models::{Item, ItemId};
use crate::vector::{FlatIndex, Neighbor, VectorEngine};

/// A persisted vector-index image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub lexical_docs: usize,
    pub vectors: usize,
    pub dims: Option<usize>,
    pub vector_version: String,
}

/// Work for the indexes. Payloads are pure data.
#[derive(Debug, Clone)]
pub enum IndexRequest {
    Build { items: Vec<Item>, reset: bool },
    Upsert { item: Box<Item> },
    Remove { ids: Vec<ItemId> },
    /// Drop every vector whose id is not in `keep`.
    RetainVectors { keep: Vec<ItemId> },
    LexicalSearch { query: String, mode: LexicalMode, limit: usize },
    VectorSearch { vector: Vec<f32>, k: usize },
    Snapshot,
    Restore { snapshot: IndexSnapshot },
    Stats,
}

impl IndexRequest {
    /// Whether the request changes index contents.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            IndexRequest::Build { .. }
                | IndexRequest::Upsert { .. }
                | IndexRequest::Remove { .. }
                | IndexRequest::RetainVectors { .. }
                | IndexRequest::Restore { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub enum IndexResponse {
    Done,
    Removed(Vec<ItemId>),
    Lexical(Vec<ScoredId>),
    Vector(Vec<Neighbor>),
    Snapshot(IndexSnapshot),
    Stats(IndexStats),
}

/// The lexical and vector engines of one index instance.
pub struct SearchIndexes {
    lexical: Box<dyn LexicalEngine>,
    vector: Box<dyn VectorEngine>,
}

impl SearchIndexes {
    pub fn new(lexical: Box<dyn LexicalEngine>, vector: Box<dyn VectorEngine>) -> Self {
        Self { lexical, vector }
    }

    fn index_vector(&mut self, item: &Item) {
        if item.embedding.is_empty() {
            self.vector.remove(&[item.id]);
            return;
        }
        if let Err(e) = self.vector.add(item.id, item.embedding.clone()) {
            warn!(item_id = item.id, "skipping vector: {:#}", e);
            self.vector.remove(&[item.id]);
        }
    }

    pub fn handle(&mut self, request: IndexRequest) -> Result<IndexResponse> {
        match request {
            IndexRequest::Build { items, reset } => {
                self.lexical.build(&items, reset);
                if reset {
                    self.vector.clear();
                }
                for item in &items {
                    self.index_vector(item);
                }
                debug!(
                    items = items.len(),
                    reset,
                    lexical_docs = self.lexical.len(),
                    vectors = self.vector.len(),
                    "indexes built"
                );
                Ok(IndexResponse::Done)
            }
            IndexRequest::Upsert { item } => {
                self.lexical.upsert(&item);
                self.index_vector(&item);
                Ok(IndexResponse::Done)
            }
            IndexRequest::Remove { ids } => {
                self.lexical.remove(&ids);
                self.vector.remove(&ids);
                Ok(IndexResponse::Done)
            }
            IndexRequest::RetainVectors { keep } => {
                let keep: HashSet<ItemId> = keep.into_iter().collect();
                let stale: Vec<ItemId> = self
                    .vector
                    .ids()
                    .into_iter()
                    .filter(|id| !keep.contains(id))
                    .collect();
                self.vector.remove(&stale);
                Ok(IndexResponse::Removed(stale))
            }
            IndexRequest::Restore { snapshot } => {
                self.vector.restore(&snapshot.data)?;
                Ok(IndexResponse::Done)
            }
            read => self.read(read),
        }
    }

    /// Execute a non-mutating request.
    pub fn read(&self, request: IndexRequest) -> Result<IndexResponse> {
        match request {
            IndexRequest::LexicalSearch { query, mode, limit } => Ok(IndexResponse::Lexical(
                self.lexical.search(&query, mode, limit),
            )),
            IndexRequest::VectorSearch { vector, k } => {
                Ok(IndexResponse::Vector(self.vector.search(&vector, k)))
            }
            IndexRequest::Snapshot => Ok(IndexResponse::Snapshot(IndexSnapshot {
                version: self.vector.version().to_string(),
                data: self.vector.serialize()?,
            })),
            IndexRequest::Stats => Ok(IndexResponse::Stats(self.stats())),
            other => Err(anyhow!("{:?} is not a read request", other)),
        }
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            lexical_docs: self.lexical.len(),
            vectors: self.vector.len(),
            dims: self.vector.dims(),
            vector_version: self.vector.version().to_string(),
        }
    }
}

impl Default for SearchIndexes {
    fn default() -> Self {
        Self::new(Box::new(FieldIndex::new()), Box::new(FlatIndex::new()))
    }
}

fn unexpected(op: &str, response: IndexResponse) -> anyhow::Error {
    anyhow!("unexpected index response to {}: {:?}", op, response)
}

/// Where index requests are executed.
///
/// Implementors only provide [`IndexBackend::call`]; the typed helpers
/// are derived from it.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    async fn call(&self, request: IndexRequest) -> Result<IndexResponse>;

    async fn build(&self, items: Vec<Item>, reset: bool) -> Result<()> {
        self.call(IndexRequest::Build { items, reset }).await?;
        Ok(())
    }

    async fn upsert(&self, item: Item) -> Result<()> {
        self.call(IndexRequest::Upsert {
            item: Box::new(item),
        })
        .await?;
        Ok(())
    }

    async fn remove(&self, ids: Vec<ItemId>) -> Result<()> {
        self.call(IndexRequest::Remove { ids }).await?;
        Ok(())
    }

    /// Drop vectors for ids outside `keep`; returns the dropped ids.
    async fn retain_vectors(&self, keep: Vec<ItemId>) -> Result<Vec<ItemId>> {
        match self.call(IndexRequest::RetainVectors { keep }).await? {
            IndexResponse::Removed(ids) => Ok(ids),
            other => Err(unexpected("retain vectors", other)),
        }
    }

    async fn lexical_search(
        &self,
        query: &str,
        mode: LexicalMode,
        limit: usize,
    ) -> Result<Vec<ScoredId>> {
        match self
            .call(IndexRequest::LexicalSearch {
                query: query.to_string(),
                mode,
                limit,
            })
            .await?
        {
            IndexResponse::Lexical(hits) => Ok(hits),
            other => Err(unexpected("lexical search", other)),
        }
    }

    async fn vector_search(&self, vector: Vec<f32>, k: usize) -> Result<Vec<Neighbor>> {
        match self.call(IndexRequest::VectorSearch { vector, k }).await? {
            IndexResponse::Vector(hits) => Ok(hits),
            other => Err(unexpected("vector search", other)),
        }
    }

    async fn snapshot(&self) -> Result<IndexSnapshot> {
        match self.call(IndexRequest::Snapshot).await? {
            IndexResponse::Snapshot(s) => Ok(s),
            other => Err(unexpected("snapshot", other)),
        }
    }

    async fn restore(&self, snapshot: IndexSnapshot) -> Result<()> {
        self.call(IndexRequest::Restore { snapshot }).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats> {
        match self.call(IndexRequest::Stats).await? {
            IndexResponse::Stats(s) => Ok(s),
            other => Err(unexpected("stats", other)),
        }
    }
}

/// In-process backend. Reads share the lock; mutations take it exclusively.
#[derive(Default)]
pub struct LocalIndexes {
    inner: RwLock<SearchIndexes>,
}

impl LocalIndexes {
    pub fn new(indexes: SearchIndexes) -> Self {
        Self {
            inner: RwLock::new(indexes),
        }
    }
}

#[async_trait]
impl IndexBackend for LocalIndexes {
    async fn call(&self, request: IndexRequest) -> Result<IndexResponse> {
        if request.is_mutation() {
            let mut guard = self
                .inner
                .write()
                .map_err(|_| anyhow!("index lock poisoned"))?;
            guard.handle(request)
        } else {
            let guard = self
                .inner
                .read()
                .map_err(|_| anyhow!("index lock poisoned"))?;
            guard.read(request)
        }
    }
}
