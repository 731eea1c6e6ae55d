//! Contracts for the external collaborators: the source of bookmarked
//! repositories and the AI service used for enrichment and ranking.
//!
//! Both are traits so the pipeline and the retrieval engine can be driven
//! by test doubles. Implementations classify their failures with
//! [`ShelfError`](crate::error::ShelfError) inside the returned
//! `anyhow::Error`.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Item, ItemId};
use crate::text::truncate_chars;

/// One page of bookmarked repositories, newest bookmark first.
#[derive(Debug, Clone, Default)]
pub struct BookmarkPage {
    pub items: Vec<Item>,
    pub has_more: bool,
}

/// Identity of the account whose bookmarks are synced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch page `page` (1-based) of bookmarks.
    async fn list_bookmarked(&self, page: u32) -> Result<BookmarkPage>;

    /// Raw readme text, or `None` when the repository has none.
    async fn fetch_readme(&self, owner: &str, name: &str) -> Result<Option<String>>;

    async fn get_profile(&self) -> Result<Profile>;
}

/// Input for one item of a summarize/tag batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichRequest {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    pub readme: String,
}

impl EnrichRequest {
    /// Build a request from an item, clipping the readme to `readme_chars`.
    pub fn from_item(item: &Item, readme_chars: usize) -> Self {
        Self {
            id: item.id,
            name: item.full_name.clone(),
            description: item.description.clone().unwrap_or_default(),
            readme: item
                .readme
                .as_deref()
                .map(|r| truncate_chars(r, readme_chars).to_string())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichResult {
    pub id: ItemId,
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Keyword expansion of a natural-language query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRewrite {
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Phrases a good result must contain.
    #[serde(default)]
    pub must: Vec<String>,
}

/// Compact view of a candidate sent to the ranking model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankCandidate {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    pub summary: String,
    pub tags: Vec<String>,
}

impl From<&Item> for RankCandidate {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id,
            name: item.full_name.clone(),
            description: item.description.clone().unwrap_or_default(),
            summary: item.ai_summary.clone().unwrap_or_default(),
            tags: item.ai_tags.clone(),
        }
    }
}

#[async_trait]
pub trait AiClient: Send + Sync {
    /// Summaries and tags for a batch. The response may omit ids.
    async fn summarize_and_tag(&self, batch: &[EnrichRequest]) -> Result<Vec<EnrichResult>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn rewrite_query(&self, query: &str) -> Result<QueryRewrite>;

    /// Ordered subset of candidate ids, best first, at most `top_k` long.
    async fn rank_candidates(
        &self,
        query: &str,
        candidates: &[RankCandidate],
        top_k: usize,
    ) -> Result<Vec<ItemId>>;
}

/// Canonical text embedded for an item.
pub fn embedding_text(item: &Item) -> String {
    let mut parts: Vec<&str> = vec![&item.name, &item.full_name];
    if let Some(d) = item.description.as_deref() {
        parts.push(d);
    }
    if let Some(s) = item.ai_summary.as_deref() {
        parts.push(s);
    }
    let mut text = parts.join("\n");
    let labels: Vec<&str> = item
        .ai_tags
        .iter()
        .chain(item.topics.iter())
        .map(String::as_str)
        .collect();
    if !labels.is_empty() {
        text.push('\n');
        text.push_str(&labels.join(", "));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_text_includes_enrichment() {
        let mut item = Item::new(1, "acme", "widget");
        item.description = Some("Widgets for everyone".into());
        item.ai_summary = Some("A widget toolkit.".into());
        item.ai_tags = vec!["ui".into()];
        item.topics = vec!["rust".into()];
        let text = embedding_text(&item);
        assert!(text.starts_with("widget\nacme/widget"));
        assert!(text.contains("A widget toolkit."));
        assert!(text.ends_with("ui, rust"));
    }

    #[test]
    fn enrich_request_clips_readme() {
        let mut item = Item::new(1, "acme", "widget");
        item.readme = Some("x".repeat(100));
        let req = EnrichRequest::from_item(&item, 10);
        assert_eq!(req.readme.len(), 10);
        assert_eq!(req.name, "acme/widget");
        assert_eq!(req.description, "");
    }
}
