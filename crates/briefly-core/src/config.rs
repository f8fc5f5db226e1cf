//! Per-invocation pipeline configuration.
//!
//! A [`Configuration`] is resolved fresh for every run and is immutable
//! while the run executes. It is never stored in the conversation state.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PipelineError;
use crate::prompts::{QUERY_SYSTEM_PROMPT, RESPONSE_SYSTEM_PROMPT};

/// Settings for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Identity of the user asking.
    pub user_id: String,
    /// Thread whose state the run reads and extends.
    pub thread_id: String,
    /// Name of the vector-search backend (e.g. `"sqlite"`, `"memory"`).
    pub retriever_provider: String,
    /// Model used to embed queries, as `"<provider>/<model>"`.
    pub embedding_model: String,
    /// Model used by `generate_query` on follow-up turns.
    pub query_model: String,
    /// Model used by `respond`.
    pub response_model: String,
    /// Number of documents returned by retrieval.
    pub k: usize,
    /// Candidate pool size for the similarity search.
    pub num_candidates: usize,
    /// System prompt template for query generation.
    pub query_system_prompt: String,
    /// System prompt template for the answer.
    pub response_system_prompt: String,
    /// Skip appending a generated query equal to the latest one.
    pub dedupe_queries: bool,
}

impl Configuration {
    /// A configuration with default models, prompts, and search parameters.
    ///
    /// The retriever provider is left empty and must be chosen with
    /// [`with_retriever`](Self::with_retriever) before the configuration
    /// validates.
    pub fn new(user_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            thread_id: thread_id.into(),
            retriever_provider: String::new(),
            embedding_model: "openai/text-embedding-3-small".to_string(),
            query_model: "openai/gpt-4o-mini".to_string(),
            response_model: "openai/gpt-4o-mini".to_string(),
            k: 4,
            num_candidates: 100,
            query_system_prompt: QUERY_SYSTEM_PROMPT.to_string(),
            response_system_prompt: RESPONSE_SYSTEM_PROMPT.to_string(),
            dedupe_queries: false,
        }
    }

    pub fn with_retriever(mut self, provider: impl Into<String>) -> Self {
        self.retriever_provider = provider.into();
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_query_model(mut self, model: impl Into<String>) -> Self {
        self.query_model = model.into();
        self
    }

    pub fn with_response_model(mut self, model: impl Into<String>) -> Self {
        self.response_model = model.into();
        self
    }

    pub fn with_search(mut self, k: usize, num_candidates: usize) -> Self {
        self.k = k;
        self.num_candidates = num_candidates;
        self
    }

    pub fn with_dedupe_queries(mut self, dedupe: bool) -> Self {
        self.dedupe_queries = dedupe;
        self
    }

    /// The same configuration scoped to another user and thread.
    pub fn for_thread(mut self, user_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self.thread_id = thread_id.into();
        self
    }

    /// Check that every required field is present.
    ///
    /// `num_candidates < k` is allowed (at most `num_candidates` documents
    /// come back) but logged.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let required = [
            ("thread_id", &self.thread_id),
            ("retriever_provider", &self.retriever_provider),
            ("embedding_model", &self.embedding_model),
            ("query_model", &self.query_model),
            ("response_model", &self.response_model),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(PipelineError::Configuration(format!("{name} must be set")));
            }
        }
        if self.k == 0 {
            return Err(PipelineError::Configuration("k must be >= 1".to_string()));
        }
        if self.num_candidates == 0 {
            return Err(PipelineError::Configuration(
                "num_candidates must be >= 1".to_string(),
            ));
        }
        if self.num_candidates < self.k {
            warn!(
                k = self.k,
                num_candidates = self.num_candidates,
                "num_candidates is smaller than k; fewer than k documents will be returned"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Configuration {
        Configuration::new("u1", "t1").with_retriever("memory")
    }

    #[test]
    fn test_defaults_validate_once_retriever_set() {
        assert!(valid().validate().is_ok());
        assert!(Configuration::new("u1", "t1").validate().is_err());
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = valid().with_response_model(" ").validate().unwrap_err();
        assert!(err.to_string().contains("response_model"));

        let err = valid().for_thread("u1", "").validate().unwrap_err();
        assert!(err.to_string().contains("thread_id"));
    }

    #[test]
    fn test_zero_search_params_rejected() {
        assert!(valid().with_search(0, 10).validate().is_err());
        assert!(valid().with_search(4, 0).validate().is_err());
    }

    #[test]
    fn test_small_candidate_pool_is_allowed() {
        assert!(valid().with_search(10, 2).validate().is_ok());
    }
}
