//! Vector-search retrieval abstraction.
//!
//! Backends are pluggable: each one implements [`RetrieverProvider`] and is
//! registered under a name in a [`RetrieverRegistry`]. The `retriever_provider`
//! configuration field selects one per run.
//!
//! # Lifecycle
//!
//! ```text
//! RetrieverProvider::open(embedder, params) ──▶ Box<dyn Retriever>
//!                                                  │
//!                                       search(query) (embed + kNN)
//!                                                  │
//!                                               close()
//! ```
//!
//! A retriever owns whatever connection it opened. The `retrieve` stage calls
//! [`Retriever::close`] on every exit path, including failed searches.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::RetrievalError;
use crate::models::{RawDocument, RetrievedDocument};

/// Similarity-search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    /// Number of documents returned.
    pub k: usize,
    /// Size of the nearest-neighbour candidate pool the top `k` are drawn
    /// from. Bounds the result when smaller than `k`.
    pub num_candidates: usize,
}

/// An open handle onto a vector-search backend.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Embed `query` and return up to `k` documents, highest score first.
    async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>, RetrievalError>;

    /// Release the underlying connection. Called exactly once, after the
    /// last search.
    async fn close(&self) {}
}

/// Factory for [`Retriever`]s of one backend.
#[async_trait]
pub trait RetrieverProvider: Send + Sync {
    /// Name matched against `Configuration::retriever_provider`.
    fn name(&self) -> &str;

    /// Acquire a retriever that embeds queries with `embedder`.
    async fn open(
        &self,
        embedder: Arc<dyn Embedder>,
        params: SearchParams,
    ) -> Result<Box<dyn Retriever>, RetrievalError>;
}

/// Named collection of retriever backends.
#[derive(Default)]
pub struct RetrieverRegistry {
    providers: Vec<Arc<dyn RetrieverProvider>>,
}

impl RetrieverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend. A later registration under the same name
    /// replaces the earlier one.
    pub fn register(&mut self, provider: Arc<dyn RetrieverProvider>) {
        self.providers.retain(|p| p.name() != provider.name());
        self.providers.push(provider);
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn RetrieverProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// Registered backend names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }
}

/// Normalize raw backend hits: resolve content through the field fallback
/// chain, drop hits with no text, sort by descending score (stable for
/// ties), and keep the top `k`.
pub fn rank_documents(raw: Vec<RawDocument>, k: usize) -> Vec<RetrievedDocument> {
    let mut docs: Vec<RetrievedDocument> = raw
        .into_iter()
        .filter_map(RawDocument::into_retrieved)
        .collect();
    docs.sort_by(|a, b| b.score.total_cmp(&a.score));
    docs.truncate(k);
    docs
}

/// Select from exhaustively scored hits: the `num_candidates` nearest form
/// the candidate pool and the top `k` of those are returned, ranked as by
/// [`rank_documents`].
pub fn nearest_documents(scored: Vec<RawDocument>, params: SearchParams) -> Vec<RetrievedDocument> {
    rank_documents(scored, params.k.min(params.num_candidates))
}
