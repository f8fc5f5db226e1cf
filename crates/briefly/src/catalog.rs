//! Resolves `"<provider>/<model>"` strings into model clients.
//!
//! One [`ProviderCatalog`] is built per process. It owns the shared HTTP
//! client and reads `OPENAI_API_KEY` once; clients are constructed on
//! demand for each spec a run asks for.

use anyhow::Result;
use std::sync::Arc;

use briefly_core::chat::{ChatModel, ModelCatalog, ModelSpec};
use briefly_core::embedding::Embedder;
use briefly_core::error::{EmbeddingError, GenerationError};

use crate::chat::create_chat_model;
use crate::config::ModelsConfig;
use crate::embedding::create_embedder;
use crate::http::build_client;

pub struct ProviderCatalog {
    config: ModelsConfig,
    client: reqwest::Client,
    openai_key: Option<String>,
}

impl ProviderCatalog {
    /// Catalog reading the OpenAI key from the environment.
    pub fn from_env(config: &ModelsConfig) -> Result<Self> {
        let key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        Self::new(config, key)
    }

    pub fn new(config: &ModelsConfig, openai_key: Option<String>) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            client: build_client(config.timeout_secs)?,
            openai_key,
        })
    }
}

impl ModelCatalog for ProviderCatalog {
    fn chat_model(&self, spec: &str) -> Result<Arc<dyn ChatModel>, GenerationError> {
        let parsed: ModelSpec = spec
            .parse()
            .map_err(|_| GenerationError::UnsupportedModel(spec.to_string()))?;
        create_chat_model(
            &parsed,
            &self.config,
            &self.client,
            self.openai_key.as_deref(),
        )
        .map(Arc::from)
    }

    fn embedder(&self, spec: &str) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        let parsed: ModelSpec = spec.parse().map_err(EmbeddingError::NotConfigured)?;
        create_embedder(
            &parsed,
            &self.config,
            &self.client,
            self.openai_key.as_deref(),
        )
        .map(Arc::from)
    }
}
