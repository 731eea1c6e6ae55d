//! In-memory [`ItemStore`] for tests and embedders.
//!
//! Collections live in `BTreeMap`s behind a single `std::sync::RwLock`,
//! which makes [`ItemStore::replace_all`] trivially atomic and keeps
//! listing order deterministic (by id / key).

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::index::IndexSnapshot;
use crate::models::{IndexJob, Item, ItemId, Setting};

use super::{ItemStore, StoreContents, VECTOR_SNAPSHOT};

#[derive(Default)]
struct Collections {
    items: BTreeMap<ItemId, Item>,
    jobs: BTreeMap<String, IndexJob>,
    settings: BTreeMap<String, String>,
    snapshots: BTreeMap<String, IndexSnapshot>,
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-populated with `items`.
    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let store = Self::new();
        if let Ok(mut guard) = store.inner.write() {
            guard.items = items.into_iter().map(|i| (i.id, i)).collect();
        }
        store
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Collections>> {
        self.inner.read().map_err(|_| anyhow!("store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Collections>> {
        self.inner.write().map_err(|_| anyhow!("store lock poisoned"))
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn list_items(&self) -> Result<Vec<Item>> {
        Ok(self.read()?.items.values().cloned().collect())
    }

    async fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        let guard = self.read()?;
        Ok(ids.iter().filter_map(|id| guard.items.get(id).cloned()).collect())
    }

    async fn upsert_item(&self, item: &Item) -> Result<()> {
        self.write()?.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn remove_items(&self, ids: &[ItemId]) -> Result<()> {
        let mut guard = self.write()?;
        for id in ids {
            guard.items.remove(id);
        }
        Ok(())
    }

    async fn load_job(&self) -> Result<Option<IndexJob>> {
        let guard = self.read()?;
        Ok(guard
            .jobs
            .values()
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn save_job(&self, job: &IndexJob) -> Result<()> {
        self.write()?.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn clear_job(&self, id: &str) -> Result<()> {
        self.write()?.jobs.remove(id);
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<IndexJob>> {
        Ok(self.read()?.jobs.values().cloned().collect())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read()?.settings.get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        self.write()?
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn list_settings(&self) -> Result<Vec<Setting>> {
        Ok(self
            .read()?
            .settings
            .iter()
            .map(|(key, value)| Setting {
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn load_snapshot(&self, name: &str) -> Result<Option<IndexSnapshot>> {
        Ok(self.read()?.snapshots.get(name).cloned())
    }

    async fn save_snapshot(&self, name: &str, snapshot: &IndexSnapshot) -> Result<()> {
        self.write()?
            .snapshots
            .insert(name.to_string(), snapshot.clone());
        Ok(())
    }

    async fn replace_all(&self, contents: StoreContents) -> Result<()> {
        let mut fresh = Collections {
            items: contents.items.into_iter().map(|i| (i.id, i)).collect(),
            jobs: contents
                .jobs
                .into_iter()
                .map(|j| (j.id.clone(), j))
                .collect(),
            settings: contents
                .settings
                .into_iter()
                .map(|s| (s.key, s.value))
                .collect(),
            snapshots: BTreeMap::new(),
        };
        if let Some(snapshot) = contents.snapshot {
            fresh.snapshots.insert(VECTOR_SNAPSHOT.to_string(), snapshot);
        }
        *self.write()? = fresh;
        Ok(())
    }
}
