//! Core data models.
//!
//! An [`Item`] is one bookmarked repository together with everything the
//! enrichment pipeline adds to it. An [`IndexJob`] is the durable
//! checkpoint of an enrichment run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ShelfError;

/// Stable identifier of an item across syncs (the source repository id).
pub type ItemId = i64;

/// A bookmarked repository and its enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    /// `owner/name`.
    pub full_name: String,
    pub owner: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub stargazers: u64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub readme: Option<String>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub ai_tags: Vec<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub starred_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub enriched_at: Option<DateTime<Utc>>,
}

impl Item {
    /// Minimal item with only the identifying fields set.
    pub fn new(id: ItemId, owner: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.to_string(),
            full_name: format!("{}/{}", owner, name),
            owner: owner.to_string(),
            description: None,
            html_url: None,
            language: None,
            stargazers: 0,
            topics: Vec::new(),
            readme: None,
            ai_summary: None,
            ai_tags: Vec::new(),
            embedding: Vec::new(),
            starred_at: now,
            updated_at: now,
            enriched_at: None,
        }
    }

    /// True when the item still lacks a summary or an embedding.
    pub fn needs_enrichment(&self) -> bool {
        self.ai_summary.is_none() || self.embedding.is_empty()
    }

    /// Refresh the source-owned fields from a newer copy.
    ///
    /// Enrichment is kept unless the name or description changed; then the
    /// summary, tags, embedding and `enriched_at` are cleared so the item is
    /// queued again. The cached readme is always kept.
    pub fn merge_source(&mut self, fresh: Item) {
        let changed = self.description != fresh.description || self.name != fresh.name;
        self.name = fresh.name;
        self.full_name = fresh.full_name;
        self.owner = fresh.owner;
        self.description = fresh.description;
        self.html_url = fresh.html_url;
        self.language = fresh.language;
        self.stargazers = fresh.stargazers;
        self.topics = fresh.topics;
        self.starred_at = fresh.starred_at;
        self.updated_at = fresh.updated_at;
        if changed {
            // Summary and embedding describe stale text now.
            self.ai_summary = None;
            self.ai_tags.clear();
            self.embedding.clear();
            self.enriched_at = None;
        }
    }
}

/// Durable progress record of an enrichment run.
///
/// `done + queue.len() == total` holds from creation until the job is
/// cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexJob {
    pub id: String,
    pub queue: Vec<ItemId>,
    pub done: usize,
    pub total: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexJob {
    pub fn new(id: impl Into<String>, queue: Vec<ItemId>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            total: queue.len(),
            queue,
            done: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pop the first `n` ids off the queue and count them as done.
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.queue.len());
        self.queue.drain(..n);
        self.done += n;
        self.updated_at = Utc::now();
    }

    pub fn check_invariant(&self) -> Result<(), ShelfError> {
        if self.done + self.queue.len() != self.total {
            return Err(ShelfError::InvariantViolation(format!(
                "job {}: done {} + queued {} != total {}",
                self.id,
                self.done,
                self.queue.len(),
                self.total
            )));
        }
        Ok(())
    }
}

/// A key/value application setting (last sync time, profile login, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_advance_keeps_invariant() {
        let mut job = IndexJob::new("j1", (1..=10).collect());
        job.advance(6);
        assert_eq!(job.done, 6);
        assert_eq!(job.queue, vec![7, 8, 9, 10]);
        assert!(job.check_invariant().is_ok());
        job.advance(100);
        assert!(job.is_complete());
        assert_eq!(job.done, 10);
        assert!(job.check_invariant().is_ok());
    }

    #[test]
    fn job_invariant_detects_mismatch() {
        let mut job = IndexJob::new("j2", vec![1, 2, 3]);
        job.total = 5;
        assert!(matches!(
            job.check_invariant(),
            Err(ShelfError::InvariantViolation(_))
        ));
    }

    #[test]
    fn merge_source_keeps_enrichment_when_text_unchanged() {
        let mut item = Item::new(1, "acme", "widget");
        item.description = Some("widgets".into());
        item.ai_summary = Some("a widget library".into());
        item.embedding = vec![0.1, 0.2];

        let mut fresh = Item::new(1, "acme", "widget");
        fresh.description = Some("widgets".into());
        fresh.stargazers = 42;
        item.merge_source(fresh);

        assert_eq!(item.stargazers, 42);
        assert_eq!(item.ai_summary.as_deref(), Some("a widget library"));
        assert!(!item.needs_enrichment());
    }

    #[test]
    fn merge_source_invalidates_on_description_change() {
        let mut item = Item::new(1, "acme", "widget");
        item.ai_summary = Some("old".into());
        item.ai_tags = vec!["old-tag".into()];
        item.embedding = vec![1.0];
        item.readme = Some("readme".into());
        let mut fresh = Item::new(1, "acme", "widget");
        fresh.description = Some("brand new".into());
        item.merge_source(fresh);
        assert!(item.needs_enrichment());
        assert!(item.ai_tags.is_empty());
        assert!(item.enriched_at.is_none());
        assert_eq!(item.readme.as_deref(), Some("readme"));
    }
}
