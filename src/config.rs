use anyhow::{Context, Result};
use serde::Deserialize;
use starshelf_core::retrieval::RankingParams;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_github_api")]
    pub api_url: String,
    /// Environment variable holding the access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Consecutive already-known bookmarks that end an incremental sync.
    #[serde(default = "default_stop_streak")]
    pub stop_streak: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api(),
            token_env: default_token_env(),
            per_page: default_per_page(),
            stop_streak: default_stop_streak(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_per_page() -> u32 {
    100
}
fn default_stop_streak() -> usize {
    30
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub rewrite_queries: bool,
    #[serde(default = "default_true")]
    pub rerank: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_ai_base_url(),
            chat_model: None,
            embedding_model: None,
            dims: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            rewrite_queries: true,
            rerank: true,
        }
    }
}

impl AiConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    #[serde(default = "default_pool")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_pool")]
    pub write_concurrency: usize,
    #[serde(default = "default_ai_batch")]
    pub ai_batch_size: usize,
    #[serde(default = "default_chunk")]
    pub chunk_size: usize,
    #[serde(default = "default_readme_max")]
    pub readme_max_chars: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_pool(),
            write_concurrency: default_pool(),
            ai_batch_size: default_ai_batch(),
            chunk_size: default_chunk(),
            readme_max_chars: default_readme_max(),
        }
    }
}

fn default_pool() -> usize {
    3
}
fn default_ai_batch() -> usize {
    4
}
fn default_chunk() -> usize {
    6
}
fn default_readme_max() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(flatten)]
    pub ranking: RankingParams,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
            ranking: RankingParams::default(),
        }
    }
}

fn default_final_limit() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let e = &config.enrichment;
    if e.fetch_concurrency == 0 || e.write_concurrency == 0 {
        anyhow::bail!("enrichment concurrency must be > 0");
    }
    if e.ai_batch_size == 0 {
        anyhow::bail!("enrichment.ai_batch_size must be > 0");
    }
    if e.chunk_size == 0 {
        anyhow::bail!("enrichment.chunk_size must be > 0");
    }

    if config.github.per_page == 0 || config.github.per_page > 100 {
        anyhow::bail!("github.per_page must be in [1, 100]");
    }

    let r = &config.retrieval;
    if r.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    for (name, value) in [
        ("score_blend", r.ranking.score_blend),
        ("rank_blend", r.ranking.rank_blend),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
        }
    }
    if r.ranking.stage2_keep == 0 || r.ranking.stage1_keep < r.ranking.stage2_keep {
        anyhow::bail!("retrieval.stage1_keep must be >= retrieval.stage2_keep > 0");
    }

    let ai = &config.ai;
    match ai.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown AI provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if ai.is_enabled() {
        if ai.dims.is_none() || ai.dims == Some(0) {
            anyhow::bail!("ai.dims must be > 0 when provider is '{}'", ai.provider);
        }
        if ai.chat_model.is_none() || ai.embedding_model.is_none() {
            anyhow::bail!(
                "ai.chat_model and ai.embedding_model must be specified when provider is '{}'",
                ai.provider
            );
        }
    }

    Ok(())
}
