//! Configuration parsing and validation.
//!
//! Briefly is configured via a TOML file (default: `config/briefly.toml`).
//! Every section except `[db]` is optional and falls back to defaults.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/briefly.sqlite"
//!
//! [models]
//! embedding = "openai/text-embedding-3-small"
//! query = "openai/gpt-4o-mini"
//! response = "openai/gpt-4o-mini"
//! timeout_secs = 60
//! max_retries = 3
//!
//! [retrieval]
//! provider = "sqlite"
//! k = 4
//! num_candidates = 100
//!
//! [conversation]
//! default_user = "local"
//! dedupe_queries = false
//! ```
//!
//! The configuration file supplies defaults. A per-turn
//! [`Configuration`] is derived from it with
//! [`Config::conversation_config`] and may be overridden from the CLI.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use briefly_core::chat::ModelSpec;
use briefly_core::prompts::{QUERY_SYSTEM_PROMPT, RESPONSE_SYSTEM_PROMPT};
use briefly_core::Configuration;

/// Embedding providers this build can construct.
pub const EMBEDDING_PROVIDERS: [&str; 3] = ["openai", "ollama", "local"];

/// Chat providers this build can construct.
pub const CHAT_PROVIDERS: [&str; 2] = ["openai", "ollama"];

/// Retriever backends this build registers.
pub const RETRIEVER_PROVIDERS: [&str; 1] = ["sqlite"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    #[serde(default = "default_embedding_model")]
    pub embedding: String,
    #[serde(default = "default_chat_model")]
    pub query: String,
    #[serde(default = "default_chat_model")]
    pub response: String,
    /// Declared embedding dimensionality. Informational for remote
    /// providers; required by nothing.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            embedding: default_embedding_model(),
            query: default_chat_model(),
            response: default_chat_model(),
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            openai_base_url: default_openai_base_url(),
            ollama_url: default_ollama_url(),
        }
    }
}

fn default_embedding_model() -> String {
    "openai/text-embedding-3-small".to_string()
}
fn default_chat_model() -> String {
    "openai/gpt-4o-mini".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_retriever")]
    pub provider: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_num_candidates")]
    pub num_candidates: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            provider: default_retriever(),
            k: default_k(),
            num_candidates: default_num_candidates(),
        }
    }
}

fn default_retriever() -> String {
    "sqlite".to_string()
}
fn default_k() -> usize {
    4
}
fn default_num_candidates() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    /// User id recorded when `--user` is not given.
    #[serde(default = "default_user")]
    pub default_user: String,
    #[serde(default)]
    pub dedupe_queries: bool,
    /// Replaces the built-in query prompt. Supports `{queries}` and
    /// `{system_time}`.
    #[serde(default)]
    pub query_system_prompt: Option<String>,
    /// Replaces the built-in response prompt. Supports `{retrieved_docs}`
    /// and `{system_time}`.
    #[serde(default)]
    pub response_system_prompt: Option<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            default_user: default_user(),
            dedupe_queries: false,
            query_system_prompt: None,
            response_system_prompt: None,
        }
    }
}

fn default_user() -> String {
    "local".to_string()
}

impl Config {
    /// Per-turn pipeline configuration for `user_id` on `thread_id`.
    pub fn conversation_config(&self, user_id: &str, thread_id: &str) -> Configuration {
        let mut config = Configuration::new(user_id, thread_id)
            .with_retriever(&self.retrieval.provider)
            .with_embedding_model(&self.models.embedding)
            .with_query_model(&self.models.query)
            .with_response_model(&self.models.response)
            .with_search(self.retrieval.k, self.retrieval.num_candidates)
            .with_dedupe_queries(self.conversation.dedupe_queries);
        config.query_system_prompt = self
            .conversation
            .query_system_prompt
            .clone()
            .unwrap_or_else(|| QUERY_SYSTEM_PROMPT.to_string());
        config.response_system_prompt = self
            .conversation
            .response_system_prompt
            .clone()
            .unwrap_or_else(|| RESPONSE_SYSTEM_PROMPT.to_string());
        config
    }
}

/// Check that a `"<provider>/<model>"` string names one of `providers`.
pub fn validate_model_spec(field: &str, spec: &str, providers: &[&str]) -> Result<ModelSpec> {
    let parsed: ModelSpec = spec
        .parse()
        .map_err(|e: String| anyhow::anyhow!("{field}: {e}"))?;
    if !providers.contains(&parsed.provider.as_str()) {
        anyhow::bail!(
            "{}: unknown model provider '{}'. Must be one of: {}",
            field,
            parsed.provider,
            providers.join(", ")
        );
    }
    Ok(parsed)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if config.retrieval.num_candidates < 1 {
        anyhow::bail!("retrieval.num_candidates must be >= 1");
    }
    if !RETRIEVER_PROVIDERS.contains(&config.retrieval.provider.as_str()) {
        anyhow::bail!(
            "Unknown retriever provider: '{}'. Must be one of: {}",
            config.retrieval.provider,
            RETRIEVER_PROVIDERS.join(", ")
        );
    }

    // Validate models
    validate_model_spec(
        "models.embedding",
        &config.models.embedding,
        &EMBEDDING_PROVIDERS,
    )?;
    validate_model_spec("models.query", &config.models.query, &CHAT_PROVIDERS)?;
    validate_model_spec("models.response", &config.models.response, &CHAT_PROVIDERS)?;
    if config.models.batch_size == 0 {
        anyhow::bail!("models.batch_size must be > 0");
    }
    if config.models.dims == Some(0) {
        anyhow::bail!("models.dims must be > 0 when set");
    }

    if config.conversation.default_user.trim().is_empty() {
        anyhow::bail!("conversation.default_user must not be empty");
    }

    Ok(config)
}
