//! GitHub implementation of [`SourceClient`].
//!
//! Bookmarks are the authenticated user's stars, fetched newest first with
//! the `star+json` media type so each entry carries its `starred_at`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, LINK};
use reqwest::StatusCode;
use serde::Deserialize;

use starshelf_core::clients::{BookmarkPage, Profile, SourceClient};
use starshelf_core::error::ShelfError;
use starshelf_core::models::Item;

use crate::config::GithubConfig;
use crate::http::{self, RetryPolicy};

const STAR_MEDIA_TYPE: &str = "application/vnd.github.star+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
    per_page: u32,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct StarredEntry {
    starred_at: DateTime<Utc>,
    repo: RepoJson,
}

#[derive(Debug, Deserialize)]
struct OwnerJson {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoJson {
    id: i64,
    name: String,
    full_name: String,
    owner: OwnerJson,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    topics: Vec<String>,
    updated_at: DateTime<Utc>,
}

impl StarredEntry {
    fn into_item(self) -> Item {
        let repo = self.repo;
        let mut item = Item::new(repo.id, &repo.owner.login, &repo.name);
        item.full_name = repo.full_name;
        item.description = repo.description.filter(|d| !d.trim().is_empty());
        item.html_url = repo.html_url;
        item.language = repo.language;
        item.stargazers = repo.stargazers_count;
        item.topics = repo.topics;
        item.starred_at = self.starred_at;
        item.updated_at = repo.updated_at;
        item
    }
}

#[derive(Debug, Deserialize)]
struct UserJson {
    login: String,
    #[serde(default)]
    name: Option<String>,
}

impl GithubClient {
    /// Build a client, reading the token from `config.token_env`. A missing
    /// token is reported as an auth error on first use.
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).ok().filter(|t| !t.is_empty());
        Self::with_token(config, token)
    }

    pub fn with_token(config: &GithubConfig, token: Option<String>) -> Result<Self> {
        Ok(Self {
            http: http::client(config.timeout_secs)?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            per_page: config.per_page,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    /// Override the retry policy (tests use a zero delay).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn token(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| {
            ShelfError::Auth("GitHub token not set; export GITHUB_TOKEN".to_string()).into()
        })
    }

    async fn get(&self, path: &str, accept: &str) -> Result<reqwest::Response> {
        let token = self.token()?;
        let url = format!("{}{}", self.api_url, path);
        http::send_with_retry(&self.retry, "GitHub", || {
            self.http
                .get(&url)
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .header(ACCEPT, accept)
                .header("X-GitHub-Api-Version", "2022-11-28")
        })
        .await
    }
}

fn has_next_link(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("rel=\"next\""))
        .unwrap_or(false)
}

#[async_trait]
impl SourceClient for GithubClient {
    async fn list_bookmarked(&self, page: u32) -> Result<BookmarkPage> {
        let path = format!(
            "/user/starred?sort=created&direction=desc&per_page={}&page={}",
            self.per_page, page
        );
        let response = self.get(&path, STAR_MEDIA_TYPE).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ShelfError::Auth("GitHub user not found for token".into()).into());
        }
        let has_more = has_next_link(&response);
        let entries: Vec<StarredEntry> = http::json_body(response, "starred repositories").await?;
        Ok(BookmarkPage {
            items: entries.into_iter().map(StarredEntry::into_item).collect(),
            has_more,
        })
    }

    async fn fetch_readme(&self, owner: &str, name: &str) -> Result<Option<String>> {
        let response = self
            .get(&format!("/repos/{}/{}/readme", owner, name), RAW_MEDIA_TYPE)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = response
            .text()
            .await
            .map_err(|e| {
                ShelfError::TransientNetwork(format!("readme {}/{}: {}", owner, name, e))
            })?;
        Ok(Some(text))
    }

    async fn get_profile(&self) -> Result<Profile> {
        let response = self.get("/user", "application/json").await?;
        let user: UserJson = http::json_body(response, "user profile").await?;
        Ok(Profile {
            login: user.login,
            name: user.name,
        })
    }
}
