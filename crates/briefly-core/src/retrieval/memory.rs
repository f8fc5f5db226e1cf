//! In-memory vector-search backend, registered as `"memory"`.
//!
//! Uses a `Vec` behind `std::sync::RwLock`. Search is exact: every indexed
//! document is scored by cosine similarity and the nearest are kept.

use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};

use super::{nearest_documents, Retriever, RetrieverProvider, SearchParams};
use crate::embedding::{cosine_similarity, Embedder};
use crate::error::RetrievalError;
use crate::models::{DocumentFields, RawDocument, RetrievedDocument};

struct IndexedDocument {
    fields: DocumentFields,
    embedding: Vec<f32>,
}

/// Shared document list searched by [`MemoryRetriever`]s.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    docs: RwLock<Vec<IndexedDocument>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document with its precomputed embedding.
    pub fn insert(&self, fields: DocumentFields, embedding: Vec<f32>) {
        self.docs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(IndexedDocument { fields, embedding });
    }

    /// Embed each document's resolved content with `embedder` and add it.
    /// Documents with no text are skipped. Returns the number indexed.
    pub async fn index(
        &self,
        embedder: &dyn Embedder,
        docs: Vec<DocumentFields>,
    ) -> Result<usize, RetrievalError> {
        let docs: Vec<DocumentFields> = docs
            .into_iter()
            .filter(|d| d.resolve_content().is_some())
            .collect();
        let texts: Vec<String> = docs
            .iter()
            .filter_map(|d| d.resolve_content().map(str::to_string))
            .collect();
        if texts.is_empty() {
            return Ok(0);
        }
        let vectors = embedder.embed_texts(&texts).await?;
        if vectors.len() != docs.len() {
            return Err(RetrievalError::Malformed(format!(
                "expected {} embeddings, got {}",
                docs.len(),
                vectors.len()
            )));
        }
        let count = docs.len();
        for (fields, embedding) in docs.into_iter().zip(vectors) {
            self.insert(fields, embedding);
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.docs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn nearest(&self, query_vec: &[f32], params: SearchParams) -> Vec<RetrievedDocument> {
        let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
        let scored = docs
            .iter()
            .map(|d| RawDocument {
                fields: d.fields.clone(),
                score: f64::from(cosine_similarity(query_vec, &d.embedding)),
            })
            .collect();
        nearest_documents(scored, params)
    }
}

/// Provider for the `"memory"` backend.
pub struct MemoryRetrieverProvider {
    index: Arc<InMemoryVectorIndex>,
}

impl MemoryRetrieverProvider {
    pub const NAME: &'static str = "memory";

    pub fn new(index: Arc<InMemoryVectorIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl RetrieverProvider for MemoryRetrieverProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn open(
        &self,
        embedder: Arc<dyn Embedder>,
        params: SearchParams,
    ) -> Result<Box<dyn Retriever>, RetrievalError> {
        Ok(Box::new(MemoryRetriever {
            index: self.index.clone(),
            embedder,
            params,
        }))
    }
}

/// Retriever over an [`InMemoryVectorIndex`].
pub struct MemoryRetriever {
    index: Arc<InMemoryVectorIndex>,
    embedder: Arc<dyn Embedder>,
    params: SearchParams,
}

#[async_trait]
impl Retriever for MemoryRetriever {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let query_vec = self.embedder.embed_query(query).await?;
        Ok(self.index.nearest(&query_vec, self.params))
    }
}
