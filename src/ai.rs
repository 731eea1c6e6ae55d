//! AI client implementations.
//!
//! [`OpenAiClient`] talks to any OpenAI-compatible API: chat completions in
//! JSON mode for summaries, query rewrites and candidate ranking, and the
//! embeddings endpoint for vectors. [`DisabledAi`] stands in when
//! `[ai] provider = "disabled"`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use std::sync::Arc;

use starshelf_core::clients::{AiClient, EnrichRequest, EnrichResult, QueryRewrite, RankCandidate};
use starshelf_core::error::ShelfError;
use starshelf_core::models::ItemId;

use crate::config::AiConfig;
use crate::http::{self, RetryPolicy};

const SUMMARIZE_PROMPT: &str = "You describe GitHub repositories. For every repository in the \
input array return one entry {\"id\", \"summary\", \"tags\"}: a one or two sentence summary of \
what it does and up to 8 short lowercase tags. Respond with {\"items\": [...]}.";

const REWRITE_PROMPT: &str = "You turn a natural-language search over starred GitHub \
repositories into search keywords. Respond with {\"keywords\": [...], \"must\": [...]} where \
keywords are up to 8 short alternative phrasings or library names and must lists phrases a \
relevant result has to contain (often empty).";

const RANK_PROMPT: &str = "You rank GitHub repositories by relevance to a query. Respond with \
{\"ids\": [...]} listing the ids of relevant candidates, best first. Omit irrelevant ones.";

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    dims: usize,
    api_key: Option<String>,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    #[serde(default)]
    items: Vec<EnrichResult>,
}

#[derive(Debug, Deserialize)]
struct RankEnvelope {
    #[serde(default)]
    ids: Vec<ItemId>,
}

impl OpenAiClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &AiConfig, api_key: Option<String>) -> Result<Self> {
        let chat_model = config
            .chat_model
            .clone()
            .ok_or_else(|| anyhow!("ai.chat_model required for OpenAI provider"))?;
        let embedding_model = config
            .embedding_model
            .clone()
            .ok_or_else(|| anyhow!("ai.embedding_model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("ai.dims required for OpenAI provider"))?;
        Ok(Self {
            http: http::client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model,
            embedding_model,
            dims,
            api_key,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ShelfError::Auth("AI API key not set".to_string()).into())
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let key = self.key()?;
        let url = format!("{}{}", self.base_url, path);
        let response = http::send_with_retry(&self.retry, "AI", || {
            self.http
                .post(&url)
                .header(AUTHORIZATION, format!("Bearer {}", key))
                .header(CONTENT_TYPE, "application/json")
                .json(body)
        })
        .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(anyhow!("AI endpoint not found: {}", url));
        }
        http::json_body(response, path).await
    }

    /// One JSON-mode chat completion, returning the parsed message content.
    async fn chat_json(&self, system: &str, user: String) -> Result<serde_json::Value> {
        let body = serde_json::json!({
            "model": self.chat_model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        let json = self.post("/chat/completions", &body).await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| ShelfError::Parse("chat response missing message content".into()))?;
        serde_json::from_str(content)
            .map_err(|e| ShelfError::Parse(format!("chat content is not JSON: {}", e)).into())
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value, what: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ShelfError::Parse(format!("{}: {}", what, e)).into())
}

/// Extract `data[0].embedding` from an embeddings response.
fn parse_embedding(json: &serde_json::Value) -> Result<Vec<f32>> {
    let embedding = json
        .pointer("/data/0/embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ShelfError::Parse("embedding response missing data[0].embedding".into()))?;
    embedding
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ShelfError::Parse("non-numeric embedding value".into()).into())
        })
        .collect()
}

#[async_trait]
impl AiClient for OpenAiClient {
    async fn summarize_and_tag(&self, batch: &[EnrichRequest]) -> Result<Vec<EnrichResult>> {
        let user = serde_json::to_string(batch)?;
        let value = self.chat_json(SUMMARIZE_PROMPT, user).await?;
        let envelope: SummaryEnvelope = decode(value, "summary response")?;
        let wanted: std::collections::HashSet<ItemId> = batch.iter().map(|r| r.id).collect();
        Ok(envelope
            .items
            .into_iter()
            .filter(|r| wanted.contains(&r.id) && !r.summary.trim().is_empty())
            .collect())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": [text],
            "dimensions": self.dims,
        });
        let json = self.post("/embeddings", &body).await?;
        let vector = parse_embedding(&json)?;
        if vector.len() != self.dims {
            return Err(ShelfError::Parse(format!(
                "embedding has {} dims, expected {}",
                vector.len(),
                self.dims
            ))
            .into());
        }
        Ok(vector)
    }

    async fn rewrite_query(&self, query: &str) -> Result<QueryRewrite> {
        let value = self.chat_json(REWRITE_PROMPT, query.to_string()).await?;
        decode(value, "rewrite response")
    }

    async fn rank_candidates(
        &self,
        query: &str,
        candidates: &[RankCandidate],
        top_k: usize,
    ) -> Result<Vec<ItemId>> {
        let user = serde_json::json!({ "query": query, "candidates": candidates }).to_string();
        let value = self.chat_json(RANK_PROMPT, user).await?;
        let envelope: RankEnvelope = decode(value, "rank response")?;
        let mut ids = envelope.ids;
        ids.truncate(top_k);
        Ok(ids)
    }
}

/// Every call fails with an auth error naming the missing configuration.
pub struct DisabledAi;

fn disabled() -> anyhow::Error {
    ShelfError::Auth("AI provider is disabled; set [ai] provider in the config".to_string()).into()
}

#[async_trait]
impl AiClient for DisabledAi {
    async fn summarize_and_tag(&self, _batch: &[EnrichRequest]) -> Result<Vec<EnrichResult>> {
        Err(disabled())
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(disabled())
    }

    async fn rewrite_query(&self, _query: &str) -> Result<QueryRewrite> {
        Err(disabled())
    }

    async fn rank_candidates(
        &self,
        _query: &str,
        _candidates: &[RankCandidate],
        _top_k: usize,
    ) -> Result<Vec<ItemId>> {
        Err(disabled())
    }
}

/// Build the configured client.
pub fn create_client(config: &AiConfig) -> Result<Arc<dyn AiClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledAi)),
        "openai" => Ok(Arc::new(OpenAiClient::new(config)?)),
        other => anyhow::bail!("Unknown AI provider: {}", other),
    }
}
