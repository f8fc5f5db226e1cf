//! The three pipeline stages.
//!
//! Each stage reads the running [`ConversationState`] and returns a
//! [`StateUpdate`] holding only what it changed. Stages never persist
//! anything themselves; the executor in [`graph`](crate::graph) merges and
//! checkpoints their output.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::chat::{ChatModel, ChatRequest, OutputSchema};
use crate::config::Configuration;
use crate::embedding::Embedder;
use crate::error::{GenerationError, RetrievalError};
use crate::models::{Message, RetrievedDocument};
use crate::prompts::{format_docs, render};
use crate::retrieval::{Retriever, RetrieverProvider, SearchParams};
use crate::state::{ConversationState, StateUpdate};

/// Structured output of the query model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Standalone search query for the vector index.
    pub query: String,
}

impl SearchQuery {
    pub const SCHEMA_NAME: &'static str = "search_query";

    /// The JSON Schema sent to the query model.
    pub fn output_schema() -> OutputSchema {
        OutputSchema {
            name: Self::SCHEMA_NAME.to_string(),
            description: "Search the indexed documents for information.".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Standalone search query for the user's latest message."
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }
}

/// Current time as an ISO-8601 UTC string, the `{system_time}` prompt value.
pub fn system_time() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Produce the search query for this turn.
///
/// On the first message of a thread the user's text is used verbatim and no
/// model is called. Otherwise the query model rewrites the conversation
/// into one standalone query. Output that does not match [`SearchQuery`] is
/// an error; it is never replaced by the raw text.
///
/// With `dedupe_queries` set, a query equal to the latest existing query
/// yields an empty update.
pub async fn generate_query(
    state: &ConversationState,
    config: &Configuration,
    model: &dyn ChatModel,
) -> Result<StateUpdate, GenerationError> {
    let query = if let [only] = state.messages.as_slice() {
        debug!(thread_id = %state.thread_id, "first message; using it as the query");
        only.content.clone()
    } else {
        let queries = state.queries.join("\n- ");
        let system = render(
            &config.query_system_prompt,
            &[("queries", &queries), ("system_time", &system_time())],
        );
        let request = ChatRequest {
            system,
            messages: state.messages.clone(),
        };
        let schema = SearchQuery::output_schema();
        let value = model.complete_structured(&request, &schema).await?;
        let parsed: SearchQuery =
            serde_json::from_value(value).map_err(|e| GenerationError::Schema {
                schema: schema.name.clone(),
                message: e.to_string(),
            })?;
        if parsed.query.trim().is_empty() {
            return Err(GenerationError::Schema {
                schema: schema.name,
                message: "query is empty".to_string(),
            });
        }
        parsed.query
    };

    if config.dedupe_queries && state.latest_query() == Some(query.as_str()) {
        debug!(thread_id = %state.thread_id, "query repeats the latest one; not appending");
        return Ok(StateUpdate::default());
    }
    Ok(StateUpdate::query(query))
}

/// Search the configured backend with the latest query.
///
/// The retriever is opened for this call only and closed on every exit
/// path, including a failed search.
pub async fn retrieve(
    state: &ConversationState,
    config: &Configuration,
    provider: &dyn RetrieverProvider,
    embedder: Arc<dyn Embedder>,
) -> Result<StateUpdate, RetrievalError> {
    let query = state.latest_query().ok_or(RetrievalError::NoQuery)?;
    let params = SearchParams {
        k: config.k,
        num_candidates: config.num_candidates,
    };

    let retriever = provider.open(embedder, params).await?;
    let result = search_with(retriever.as_ref(), query, params.k).await;
    retriever.close().await;

    let docs = result?;
    debug!(
        thread_id = %state.thread_id,
        provider = provider.name(),
        results = docs.len(),
        "retrieval complete"
    );
    Ok(StateUpdate::documents(docs))
}

async fn search_with(
    retriever: &dyn Retriever,
    query: &str,
    k: usize,
) -> Result<Vec<RetrievedDocument>, RetrievalError> {
    let mut docs = retriever.search(query).await?;
    // Ordering and the `k` bound hold whatever the backend returns.
    docs.retain(|d| !d.content.is_empty());
    docs.sort_by(|a, b| b.score.total_cmp(&a.score));
    docs.truncate(k);
    Ok(docs)
}

/// Answer the user from the retrieved documents.
pub async fn respond(
    state: &ConversationState,
    config: &Configuration,
    model: &dyn ChatModel,
) -> Result<StateUpdate, GenerationError> {
    let context = format_docs(&state.retrieved_docs);
    let system = render(
        &config.response_system_prompt,
        &[("retrieved_docs", &context), ("system_time", &system_time())],
    );
    let request = ChatRequest {
        system,
        messages: state.messages.clone(),
    };
    let reply = model.complete(&request).await?;
    if reply.trim().is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(StateUpdate::message(Message::assistant(reply)))
}
