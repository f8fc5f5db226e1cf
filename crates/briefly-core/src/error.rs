//! Error types for the conversation pipeline.
//!
//! Collaborators (checkpoint store, retriever, embedder, chat model) each
//! report their own error type. The executor wraps them into a
//! [`PipelineError`] tagged with the [`Stage`] that was running, so callers
//! always learn *where* a turn failed as well as *why*.

use thiserror::Error;

use crate::state::Stage;

/// Errors raised by a [`CheckpointStore`](crate::store::CheckpointStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// A checkpoint with this sequence number was already written.
    #[error("checkpoint {seq} already exists for thread {thread_id}")]
    Conflict { thread_id: String, seq: u64 },

    /// State could not be encoded or decoded.
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend is unavailable or rejected the operation.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors raised by an [`Embedder`](crate::embedding::Embedder).
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The embedding model spec names no known provider, or the provider
    /// is missing required settings.
    #[error("embedding provider not configured: {0}")]
    NotConfigured(String),

    /// The request to the embedding service failed.
    #[error("embedding request failed: {0}")]
    Request(String),

    /// The embedding service answered with something unusable.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Errors raised while resolving or querying a vector-search backend.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// No backend is registered under the requested name.
    #[error("unknown retriever provider: '{0}'")]
    UnknownProvider(String),

    /// The state holds no query to search for.
    #[error("no search query available")]
    NoQuery,

    /// Embedding the query failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// The backend could not be reached.
    #[error("vector search backend unavailable: {0}")]
    Unavailable(String),

    /// The backend returned data that could not be interpreted.
    #[error("malformed search result: {0}")]
    Malformed(String),
}

/// Errors raised by a [`ChatModel`](crate::chat::ChatModel).
#[derive(Error, Debug)]
pub enum GenerationError {
    /// The model spec names no known provider.
    #[error("unsupported chat model '{0}'")]
    UnsupportedModel(String),

    /// The request to the model service failed.
    #[error("model request failed: {0}")]
    Request(String),

    /// The model answered with no usable content.
    #[error("model returned an empty response")]
    EmptyResponse,

    /// Structured output did not match the requested schema.
    #[error("model output does not match schema '{schema}': {message}")]
    Schema { schema: String, message: String },
}

/// A failed conversation turn, as surfaced to callers.
///
/// Every variant except [`Configuration`](PipelineError::Configuration)
/// names the stage that failed. Checkpoints written by earlier stages of the
/// same run are kept.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Required configuration is missing or invalid. Raised before any
    /// external call is made.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("retrieval failed during {stage}: {source}")]
    Retrieval {
        stage: Stage,
        #[source]
        source: RetrievalError,
    },

    #[error("generation failed during {stage}: {source}")]
    Generation {
        stage: Stage,
        #[source]
        source: GenerationError,
    },

    /// `stage` is `None` when loading the thread failed before any stage ran.
    #[error("persistence failed {}: {source}", stage_label(.stage))]
    Persistence {
        stage: Option<Stage>,
        #[source]
        source: StoreError,
    },
}

fn stage_label(stage: &Option<Stage>) -> String {
    match stage {
        Some(stage) => format!("after {stage}"),
        None => "while loading thread".to_string(),
    }
}

impl PipelineError {
    /// The stage that was running when the error occurred, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Configuration(_) => None,
            PipelineError::Retrieval { stage, .. } | PipelineError::Generation { stage, .. } => {
                Some(*stage)
            }
            PipelineError::Persistence { stage, .. } => *stage,
        }
    }

    /// Short machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Retrieval { .. } => "retrieval",
            PipelineError::Generation { .. } => "generation",
            PipelineError::Persistence { .. } => "persistence",
        }
    }
}
