//! TOML configuration parsing and validation.
//!
//! Only `[db]` is required; every other section falls back to defaults.
//! Two environment variables are consulted after the file is parsed:
//! `LLM_TIMEOUT_MS` overrides `provider.timeout_ms`, and the provider API
//! key is read from the variable named by `provider.api_key_env`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable overriding the per-attempt provider deadline.
pub const TIMEOUT_ENV: &str = "LLM_TIMEOUT_MS";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub insights: InsightsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/files")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ProviderConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("{} environment variable not set", self.api_key_env))
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            jitter: false,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

/// Model fallback ordering, cheapest first.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    #[serde(default = "default_chat_models")]
    pub chat: Vec<String>,
    #[serde(default = "default_embedding_models")]
    pub embedding: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat: default_chat_models(),
            embedding: default_embedding_models(),
        }
    }
}

impl ModelsConfig {
    /// The model used for every stored and query embedding.
    pub fn primary_embedding(&self) -> &str {
        self.embedding
            .first()
            .map(String::as_str)
            .unwrap_or("openai/text-embedding-3-small")
    }
}

fn default_chat_models() -> Vec<String> {
    vec![
        "meta-llama/llama-3.1-8b-instruct".to_string(),
        "openai/gpt-4o-mini".to_string(),
        "anthropic/claude-3.5-sonnet".to_string(),
    ]
}
fn default_embedding_models() -> Vec<String> {
    vec![
        "openai/text-embedding-3-small".to_string(),
        "openai/text-embedding-3-large".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_dims")]
    pub dims: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dims: default_dims(),
        }
    }
}

fn default_dims() -> usize {
    1536
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            limit: default_limit(),
        }
    }
}

fn default_min_similarity() -> f64 {
    0.4
}
fn default_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct InsightsConfig {
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,
    #[serde(default = "default_per_conversation_chars")]
    pub per_conversation_chars: usize,
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            max_conversations: default_max_conversations(),
            per_conversation_chars: default_per_conversation_chars(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

fn default_max_conversations() -> usize {
    50
}
fn default_per_conversation_chars() -> usize {
    1000
}
fn default_max_prompt_chars() -> usize {
    10_000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse, apply environment overrides, and validate.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
        config.provider.timeout_ms = raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be an integer, got '{}'", TIMEOUT_ENV, raw))?;
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.provider.timeout_ms == 0 {
        bail!("provider.timeout_ms must be > 0");
    }
    if config.breaker.failure_threshold == 0 {
        bail!("breaker.failure_threshold must be >= 1");
    }
    if config.retry.max_retries == 0 {
        bail!("retry.max_retries must be >= 1");
    }
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }
    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_similarity) {
        bail!("retrieval.min_similarity must be in [-1.0, 1.0]");
    }
    if config.retrieval.limit == 0 {
        bail!("retrieval.limit must be >= 1");
    }
    if config.models.chat.is_empty() {
        bail!("models.chat must list at least one model");
    }
    if config.models.embedding.is_empty() {
        bail!("models.embedding must list at least one model");
    }
    Ok(())
}
