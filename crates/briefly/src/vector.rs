//! SQLite vector-search backend, registered as `"sqlite"`.
//!
//! Articles live in the `articles` table with their embedding stored as a
//! little-endian `f32` BLOB. A search:
//!
//! 1. embeds the query with the run's embedding model,
//! 2. loads every article embedded by that same model,
//! 3. scores each by cosine similarity,
//! 4. keeps the `num_candidates` nearest, resolves content through the
//!    field fallback chain and returns the top `k`.
//!
//! Articles embedded by another model are not comparable and never
//! considered.
//!
//! Each [`SqliteRetriever`] owns a small connection pool opened by
//! [`SqliteRetrieverProvider::open`] and released by [`Retriever::close`].

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use briefly_core::embedding::{blob_to_vec, cosine_similarity, Embedder};
use briefly_core::error::RetrievalError;
use briefly_core::models::{DocumentFields, RawDocument, RetrievedDocument};
use briefly_core::retrieval::{nearest_documents, Retriever, RetrieverProvider, SearchParams};

use crate::db;

pub struct SqliteRetrieverProvider {
    db_path: PathBuf,
}

impl SqliteRetrieverProvider {
    pub const NAME: &'static str = "sqlite";

    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

#[async_trait]
impl RetrieverProvider for SqliteRetrieverProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn open(
        &self,
        embedder: Arc<dyn Embedder>,
        params: SearchParams,
    ) -> Result<Box<dyn Retriever>, RetrievalError> {
        let pool = db::open_existing(&self.db_path, 2).await.map_err(|e| {
            RetrievalError::Unavailable(format!("{}: {e}", self.db_path.display()))
        })?;
        Ok(Box::new(SqliteRetriever {
            pool,
            embedder,
            params,
        }))
    }
}

pub struct SqliteRetriever {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    params: SearchParams,
}

impl SqliteRetriever {
    async fn score_articles(&self, query_vec: &[f32]) -> Result<Vec<RawDocument>, RetrievalError> {
        let rows = sqlx::query(
            r#"
            SELECT id, content, text, page_content, title, embedding
            FROM articles
            WHERE embedding IS NOT NULL AND embedding_model = ?
            "#,
        )
        .bind(self.embedder.model_name())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let blob: Vec<u8> = row.get("embedding");
            if blob.len() % 4 != 0 {
                return Err(RetrievalError::Malformed(format!(
                    "article {id}: embedding blob of {} bytes",
                    blob.len()
                )));
            }
            let vector = blob_to_vec(&blob);
            if vector.len() != query_vec.len() {
                return Err(RetrievalError::Malformed(format!(
                    "article {id}: embedding has {} dims, query has {}",
                    vector.len(),
                    query_vec.len()
                )));
            }

            docs.push(RawDocument {
                fields: DocumentFields {
                    content: row.get("content"),
                    text: row.get("text"),
                    page_content: row.get("page_content"),
                    title: row.get("title"),
                },
                score: f64::from(cosine_similarity(query_vec, &vector)),
            });
        }
        Ok(docs)
    }
}

#[async_trait]
impl Retriever for SqliteRetriever {
    async fn search(&self, query: &str) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let query_vec = self.embedder.embed_query(query).await?;
        let candidates = self.score_articles(&query_vec).await?;
        let examined = candidates.len();
        let docs = nearest_documents(candidates, self.params);
        debug!(examined, returned = docs.len(), "sqlite vector search");
        Ok(docs)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
