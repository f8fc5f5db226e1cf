//! Chat-completion and model-resolution traits.
//!
//! Stages never construct model clients themselves. They receive a
//! [`ModelCatalog`] that turns the `"<provider>/<model>"` strings of a
//! [`Configuration`](crate::config::Configuration) into ready clients, which
//! keeps connection handles and API keys owned by the caller.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::{EmbeddingError, GenerationError};
use crate::models::Message;

/// A prompt for a chat model: a system instruction followed by the
/// conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<Message>,
}

/// A JSON Schema the model's reply must conform to.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    /// Short identifier, sent to providers that name their schemas.
    pub name: String,
    pub description: String,
    /// JSON Schema of the expected object.
    pub schema: Value,
}

/// A chat-style language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier as sent to the provider.
    fn model_name(&self) -> &str;

    /// Free-form text completion.
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError>;

    /// Completion constrained to `schema`. Returns the parsed JSON value;
    /// callers deserialize it into their own type.
    async fn complete_structured(
        &self,
        request: &ChatRequest,
        schema: &OutputSchema,
    ) -> Result<Value, GenerationError>;
}

/// Resolves model specs into clients.
pub trait ModelCatalog: Send + Sync {
    fn chat_model(&self, spec: &str) -> Result<Arc<dyn ChatModel>, GenerationError>;

    fn embedder(&self, spec: &str) -> Result<Arc<dyn Embedder>, EmbeddingError>;
}

/// A parsed `"<provider>/<model>"` string.
///
/// The model part may itself contain slashes
/// (`"ollama/library/llama3"` → provider `ollama`, model `library/llama3`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

impl FromStr for ModelSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => Ok(Self {
                provider: provider.to_string(),
                model: model.to_string(),
            }),
            _ => Err(format!(
                "invalid model spec '{s}': expected '<provider>/<model>'"
            )),
        }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}
