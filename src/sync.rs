//! Bookmark sync.
//!
//! Pages through the source's bookmark list (newest first) and merges each
//! repository into the store and the indexes. Incremental syncs stop after
//! a streak of `stop_streak` items that are already known and were starred
//! before the previous sync. A full sync reads every page and prunes items
//! that are no longer bookmarked.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use starshelf_core::clients::SourceClient;
use starshelf_core::index::IndexBackend;
use starshelf_core::models::{Item, ItemId};
use starshelf_core::store::{ItemStore, VECTOR_SNAPSHOT};

pub const LAST_SYNC_KEY: &str = "last_sync_at";
pub const PROFILE_LOGIN_KEY: &str = "profile_login";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pages: u32,
    pub fetched: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// True when the known-item streak ended paging early.
    pub stopped_early: bool,
}

pub async fn run_sync<S, I>(
    store: &S,
    indexes: &I,
    source: &dyn SourceClient,
    stop_streak: usize,
    full: bool,
) -> Result<SyncReport>
where
    S: ItemStore + ?Sized,
    I: IndexBackend + ?Sized,
{
    let started = Utc::now();
    let profile = source.get_profile().await.context("Failed to read profile")?;

    let last_sync: Option<DateTime<Utc>> = if full {
        None
    } else {
        store
            .get_setting(LAST_SYNC_KEY)
            .await?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc))
    };

    let mut known: HashMap<ItemId, Item> = store
        .list_items()
        .await?
        .into_iter()
        .map(|i| (i.id, i))
        .collect();

    let mut report = SyncReport::default();
    let mut seen: HashSet<ItemId> = HashSet::new();
    let mut streak = 0usize;
    let mut page = 1u32;

    'pages: loop {
        let batch = source
            .list_bookmarked(page)
            .await
            .with_context(|| format!("Failed to list bookmarks (page {})", page))?;
        report.pages += 1;
        debug!(page, items = batch.items.len(), "bookmark page");

        for fresh in batch.items {
            report.fetched += 1;
            seen.insert(fresh.id);

            let old_news = last_sync.is_some_and(|t| fresh.starred_at < t);
            let item = match known.remove(&fresh.id) {
                Some(mut existing) => {
                    streak = if old_news { streak + 1 } else { 0 };
                    existing.merge_source(fresh);
                    report.updated += 1;
                    existing
                }
                None => {
                    streak = 0;
                    report.added += 1;
                    fresh
                }
            };
            store.upsert_item(&item).await?;
            indexes.upsert(item).await?;

            if !full && stop_streak > 0 && streak >= stop_streak {
                report.stopped_early = true;
                break 'pages;
            }
        }

        if !batch.has_more {
            break;
        }
        page += 1;
    }

    if full {
        let gone: Vec<ItemId> = known.into_keys().filter(|id| !seen.contains(id)).collect();
        if !gone.is_empty() {
            store.remove_items(&gone).await?;
            indexes.remove(gone.clone()).await?;
            report.removed = gone.len();
            // A stale snapshot would bring the pruned vectors back on restart.
            let snapshot = indexes.snapshot().await?;
            store.save_snapshot(VECTOR_SNAPSHOT, &snapshot).await?;
        }
    }

    store.put_setting(LAST_SYNC_KEY, &started.to_rfc3339()).await?;
    store.put_setting(PROFILE_LOGIN_KEY, &profile.login).await?;

    info!(
        login = %profile.login,
        pages = report.pages,
        added = report.added,
        updated = report.updated,
        removed = report.removed,
        "sync complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use starshelf_core::clients::{BookmarkPage, Profile};
    use starshelf_core::index::LocalIndexes;
    use starshelf_core::store::MemoryStore;
    use std::sync::Mutex;

    struct PagedSource {
        pages: Vec<Vec<Item>>,
        requested: Mutex<Vec<u32>>,
    }

    impl PagedSource {
        fn new(pages: Vec<Vec<Item>>) -> Self {
            Self {
                pages,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SourceClient for PagedSource {
        async fn list_bookmarked(&self, page: u32) -> Result<BookmarkPage> {
            self.requested.lock().unwrap().push(page);
            let idx = page as usize - 1;
            Ok(BookmarkPage {
                items: self.pages.get(idx).cloned().unwrap_or_default(),
                has_more: idx + 1 < self.pages.len(),
            })
        }

        async fn fetch_readme(&self, _owner: &str, _name: &str) -> Result<Option<String>> {
            Ok(None)
        }

        async fn get_profile(&self) -> Result<Profile> {
            Ok(Profile {
                login: "octo".into(),
                name: None,
            })
        }
    }

    fn starred(id: ItemId, name: &str, days_ago: i64) -> Item {
        let mut item = Item::new(id, "acme", name);
        item.starred_at = Utc::now() - Duration::days(days_ago);
        item
    }

    #[tokio::test]
    async fn first_sync_adds_everything() {
        let store = MemoryStore::new();
        let indexes = LocalIndexes::default();
        let source = PagedSource::new(vec![
            vec![starred(1, "alpha", 1), starred(2, "beta", 2)],
            vec![starred(3, "gamma", 3)],
        ]);

        let report = run_sync(&store, &indexes, &source, 30, false).await.unwrap();
        assert_eq!(report.added, 3);
        assert_eq!(report.pages, 2);
        assert_eq!(store.list_items().await.unwrap().len(), 3);
        assert_eq!(indexes.stats().await.unwrap().lexical_docs, 3);
        assert_eq!(
            store.get_setting(PROFILE_LOGIN_KEY).await.unwrap().as_deref(),
            Some("octo")
        );
        assert!(store.get_setting(LAST_SYNC_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn resync_keeps_enrichment() {
        let mut enriched = starred(1, "alpha", 5);
        enriched.ai_summary = Some("a summary".into());
        enriched.embedding = vec![1.0, 0.0];
        enriched.readme = Some("readme".into());
        let store = MemoryStore::with_items(vec![enriched]);
        let indexes = LocalIndexes::default();

        let mut fresh = starred(1, "alpha", 5);
        fresh.stargazers = 42;
        let source = PagedSource::new(vec![vec![fresh]]);

        let report = run_sync(&store, &indexes, &source, 30, false).await.unwrap();
        assert_eq!(report.updated, 1);
        let item = &store.get_items(&[1]).await.unwrap()[0];
        assert_eq!(item.stargazers, 42);
        assert_eq!(item.ai_summary.as_deref(), Some("a summary"));
        assert_eq!(item.readme.as_deref(), Some("readme"));
    }

    #[tokio::test]
    async fn changed_description_clears_stale_enrichment() {
        let mut enriched = starred(1, "alpha", 5);
        enriched.ai_summary = Some("a summary".into());
        enriched.ai_tags = vec!["parser".into()];
        enriched.embedding = vec![1.0, 0.0];
        enriched.readme = Some("readme".into());
        let store = MemoryStore::with_items(vec![enriched]);
        let indexes = LocalIndexes::default();
        indexes
            .build(store.list_items().await.unwrap(), true)
            .await
            .unwrap();
        assert_eq!(indexes.stats().await.unwrap().vectors, 1);

        let mut fresh = starred(1, "alpha", 5);
        fresh.description = Some("now a database".into());
        let source = PagedSource::new(vec![vec![fresh]]);
        run_sync(&store, &indexes, &source, 30, false).await.unwrap();

        let item = &store.get_items(&[1]).await.unwrap()[0];
        assert!(item.needs_enrichment());
        assert!(item.ai_summary.is_none());
        assert!(item.ai_tags.is_empty());
        assert!(item.enriched_at.is_none());
        assert_eq!(item.readme.as_deref(), Some("readme"));
        assert_eq!(indexes.stats().await.unwrap().vectors, 0);
    }

    #[tokio::test]
    async fn incremental_sync_stops_after_known_streak() {
        let old: Vec<Item> = (1..=4).map(|i| starred(i, &format!("old{}", i), 10)).collect();
        let store = MemoryStore::with_items(old.clone());
        store
            .put_setting(LAST_SYNC_KEY, &(Utc::now() - Duration::days(1)).to_rfc3339())
            .await
            .unwrap();
        let indexes = LocalIndexes::default();

        let mut first = vec![starred(10, "new", 0)];
        first.extend(old[..2].iter().cloned());
        let source = PagedSource::new(vec![first, old[2..].to_vec()]);

        let report = run_sync(&store, &indexes, &source, 2, false).await.unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.added, 1);
        assert_eq!(*source.requested.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn full_sync_prunes_unbookmarked() {
        let mut gone = starred(2, "gone", 3);
        gone.embedding = vec![1.0, 0.0];
        let store = MemoryStore::with_items(vec![starred(1, "keep", 3), gone]);
        let indexes = LocalIndexes::default();
        indexes
            .build(store.list_items().await.unwrap(), true)
            .await
            .unwrap();
        let source = PagedSource::new(vec![vec![starred(1, "keep", 3)]]);

        let report = run_sync(&store, &indexes, &source, 1, true).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(!report.stopped_early);
        let ids: Vec<ItemId> = store.list_items().await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(indexes.stats().await.unwrap().lexical_docs, 1);

        let saved = store.load_snapshot(VECTOR_SNAPSHOT).await.unwrap().unwrap();
        let fresh = LocalIndexes::default();
        fresh.restore(saved).await.unwrap();
        assert_eq!(fresh.stats().await.unwrap().vectors, 0);
    }
}
