//! Storage abstraction for starshelf.
//!
//! The [`ItemStore`] trait is every durable operation the sync, enrichment,
//! retrieval and backup code needs: the item collection, the enrichment
//! job checkpoint, key/value settings, and persisted index snapshots.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`list_items`](ItemStore::list_items) | Full item snapshot, ordered by id |
//! | [`get_items`](ItemStore::get_items) | Items for a set of ids (missing ids skipped) |
//! | [`upsert_item`](ItemStore::upsert_item) | Insert or replace one item |
//! | [`remove_items`](ItemStore::remove_items) | Delete items |
//! | [`load_job`](ItemStore::load_job) / [`save_job`](ItemStore::save_job) / [`clear_job`](ItemStore::clear_job) | Enrichment checkpoint |
//! | [`get_setting`](ItemStore::get_setting) / [`put_setting`](ItemStore::put_setting) | Settings |
//! | [`load_snapshot`](ItemStore::load_snapshot) / [`save_snapshot`](ItemStore::save_snapshot) | Index snapshots |
//! | [`replace_all`](ItemStore::replace_all) | Atomic multi-collection restore |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::index::IndexSnapshot;
use crate::models::{IndexJob, Item, ItemId, Setting};

pub use memory::MemoryStore;

/// Name under which the vector index snapshot is stored.
pub const VECTOR_SNAPSHOT: &str = "vector";

/// Everything a store holds, used for bulk export and import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreContents {
    pub items: Vec<Item>,
    pub jobs: Vec<IndexJob>,
    pub settings: Vec<Setting>,
    pub snapshot: Option<IndexSnapshot>,
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn list_items(&self) -> Result<Vec<Item>>;

    async fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>>;

    async fn upsert_item(&self, item: &Item) -> Result<()>;

    async fn remove_items(&self, ids: &[ItemId]) -> Result<()>;

    /// The oldest persisted enrichment job, if any.
    async fn load_job(&self) -> Result<Option<IndexJob>>;

    async fn save_job(&self, job: &IndexJob) -> Result<()>;

    async fn clear_job(&self, id: &str) -> Result<()>;

    async fn list_jobs(&self) -> Result<Vec<IndexJob>>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn put_setting(&self, key: &str, value: &str) -> Result<()>;

    async fn list_settings(&self) -> Result<Vec<Setting>>;

    async fn load_snapshot(&self, name: &str) -> Result<Option<IndexSnapshot>>;

    async fn save_snapshot(&self, name: &str, snapshot: &IndexSnapshot) -> Result<()>;

    /// Replace every collection at once. Either all of `contents` lands
    /// or the store is left unchanged.
    async fn replace_all(&self, contents: StoreContents) -> Result<()>;

    /// Read every collection. The default composes the list methods.
    async fn export_all(&self) -> Result<StoreContents> {
        Ok(StoreContents {
            items: self.list_items().await?,
            jobs: self.list_jobs().await?,
            settings: self.list_settings().await?,
            snapshot: self.load_snapshot(VECTOR_SNAPSHOT).await?,
        })
    }
}
