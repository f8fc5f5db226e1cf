//! Pipeline executor.
//!
//! Runs the fixed chain `generate_query → retrieve → respond` for one
//! conversation turn:
//!
//! ```text
//! load latest checkpoint ──▶ append input messages
//!        │
//!        ▼
//! ┌────────────────┐  apply + checkpoint   ┌──────────┐  apply + checkpoint   ┌─────────┐
//! │ generate_query │ ────────────────────▶ │ retrieve │ ────────────────────▶ │ respond │ ──▶ reply
//! └────────────────┘                       └──────────┘                       └─────────┘
//! ```
//!
//! Every collaborator is injected: the checkpoint store, the model catalog,
//! and the registry of retriever backends. A failed stage aborts the turn;
//! checkpoints written by earlier stages stay as the thread's durable state.

use std::sync::Arc;
use tracing::{debug, info};

use crate::chat::{ChatModel, ModelCatalog};
use crate::config::Configuration;
use crate::embedding::Embedder;
use crate::error::{GenerationError, PipelineError};
use crate::models::Message;
use crate::retrieval::{RetrieverProvider, RetrieverRegistry};
use crate::stages;
use crate::state::{ConversationState, InputState, Stage, StateUpdate};
use crate::store::{Checkpoint, CheckpointStore};

/// Collaborators resolved from a [`Configuration`] before any stage runs.
struct Resolved {
    query_model: Arc<dyn ChatModel>,
    response_model: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    retriever: Arc<dyn RetrieverProvider>,
}

/// The conversation pipeline.
///
/// Cheap to clone; every field is shared. Runs on distinct threads may
/// execute concurrently. Runs on the *same* thread must be serialized by the
/// caller.
#[derive(Clone)]
pub struct ConversationGraph {
    store: Arc<dyn CheckpointStore>,
    models: Arc<dyn ModelCatalog>,
    retrievers: Arc<RetrieverRegistry>,
}

impl ConversationGraph {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        models: Arc<dyn ModelCatalog>,
        retrievers: Arc<RetrieverRegistry>,
    ) -> Self {
        Self {
            store,
            models,
            retrievers,
        }
    }

    /// Run one turn and return the assistant message appended by `respond`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Configuration`] for invalid configuration, empty
    ///   input, or an unknown model or retriever backend. Nothing is called
    ///   or written.
    /// - [`PipelineError::Persistence`] if the thread cannot be loaded
    ///   (`stage: None`) or a checkpoint cannot be written.
    /// - [`PipelineError::Retrieval`] / [`PipelineError::Generation`] from
    ///   the failing stage.
    pub async fn run(
        &self,
        input: InputState,
        config: &Configuration,
    ) -> Result<Message, PipelineError> {
        config.validate()?;
        if input.messages.is_empty() {
            return Err(PipelineError::Configuration(
                "input must contain at least one message".to_string(),
            ));
        }
        let resolved = self.resolve(config)?;

        let mut state = self.load(&config.thread_id).await?;
        state.messages.extend(input.messages);
        info!(
            thread_id = %config.thread_id,
            user_id = %config.user_id,
            messages = state.messages.len(),
            "starting turn"
        );

        let mut reply = None;
        let mut next = Some(Stage::FIRST);
        while let Some(stage) = next {
            debug!(thread_id = %config.thread_id, %stage, "running stage");
            let update = self.run_stage(stage, &state, config, &resolved).await?;
            if stage == Stage::Respond {
                reply = update.messages.last().cloned();
            }
            state.apply(update);

            let checkpoint = self
                .store
                .append(&config.thread_id, stage, &state)
                .await
                .map_err(|source| PipelineError::Persistence {
                    stage: Some(stage),
                    source,
                })?;
            state.checkpoint_id = checkpoint.seq;
            debug!(thread_id = %config.thread_id, %stage, seq = checkpoint.seq, "checkpoint written");

            next = stage.next();
        }

        info!(
            thread_id = %config.thread_id,
            checkpoint = state.checkpoint_id,
            documents = state.retrieved_docs.len(),
            "turn complete"
        );
        reply.ok_or(PipelineError::Generation {
            stage: Stage::Respond,
            source: GenerationError::EmptyResponse,
        })
    }

    /// Run one turn for a plain-text question and return the reply text.
    ///
    /// `user_id` and `thread_id` override the ones in `config`.
    pub async fn run_turn(
        &self,
        question: &str,
        user_id: &str,
        thread_id: &str,
        config: &Configuration,
    ) -> Result<String, PipelineError> {
        let config = config.clone().for_thread(user_id, thread_id);
        let message = self.run(InputState::question(question), &config).await?;
        Ok(message.content)
    }

    /// The current state of a thread, or `None` if it has no checkpoint.
    pub async fn state(&self, thread_id: &str) -> Result<Option<ConversationState>, PipelineError> {
        let latest = self
            .store
            .latest(thread_id)
            .await
            .map_err(|source| PipelineError::Persistence { stage: None, source })?;
        Ok(latest.map(|c| c.state))
    }

    /// Checkpoints of a thread, newest first.
    pub async fn history(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>, PipelineError> {
        self.store
            .list(thread_id, limit)
            .await
            .map_err(|source| PipelineError::Persistence { stage: None, source })
    }

    fn resolve(&self, config: &Configuration) -> Result<Resolved, PipelineError> {
        let retriever = self
            .retrievers
            .find(&config.retriever_provider)
            .ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "unknown retriever provider '{}' (registered: {})",
                    config.retriever_provider,
                    self.retrievers.names().join(", ")
                ))
            })?;
        let query_model = self
            .models
            .chat_model(&config.query_model)
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        let response_model = self
            .models
            .chat_model(&config.response_model)
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        let embedder = self
            .models
            .embedder(&config.embedding_model)
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;

        Ok(Resolved {
            query_model,
            response_model,
            embedder,
            retriever,
        })
    }

    async fn load(&self, thread_id: &str) -> Result<ConversationState, PipelineError> {
        let latest = self
            .store
            .latest(thread_id)
            .await
            .map_err(|source| PipelineError::Persistence { stage: None, source })?;
        Ok(match latest {
            Some(checkpoint) => {
                debug!(thread_id, seq = checkpoint.seq, "resuming thread");
                checkpoint.state
            }
            None => ConversationState::new(thread_id),
        })
    }

    async fn run_stage(
        &self,
        stage: Stage,
        state: &ConversationState,
        config: &Configuration,
        resolved: &Resolved,
    ) -> Result<StateUpdate, PipelineError> {
        match stage {
            Stage::GenerateQuery => {
                stages::generate_query(state, config, resolved.query_model.as_ref())
                    .await
                    .map_err(|source| PipelineError::Generation { stage, source })
            }
            Stage::Retrieve => stages::retrieve(
                state,
                config,
                resolved.retriever.as_ref(),
                resolved.embedder.clone(),
            )
            .await
            .map_err(|source| PipelineError::Retrieval { stage, source }),
            Stage::Respond => stages::respond(state, config, resolved.response_model.as_ref())
                .await
                .map_err(|source| PipelineError::Generation { stage, source }),
        }
    }
}
