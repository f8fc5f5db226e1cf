//! SQLite retriever and checkpoint store exercised together through the
//! pipeline, with a keyword embedder and scripted chat model standing in
//! for remote providers.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use briefly::commands::build_graph;
use briefly::config::{Config, DbConfig};
use briefly::import::{import_records, ArticleRecord};
use briefly::vector::SqliteRetrieverProvider;
use briefly::{db, migrate};
use briefly_core::chat::{ChatModel, ChatRequest, ModelCatalog, OutputSchema};
use briefly_core::embedding::Embedder;
use briefly_core::error::{EmbeddingError, GenerationError, RetrievalError};
use briefly_core::models::DocumentFields;
use briefly_core::retrieval::{RetrieverProvider, SearchParams};
use briefly_core::{PipelineError, Stage};

const VOCAB: [&str; 6] = ["paris", "france", "capital", "berlin", "germany", "markets"];

struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        VOCAB.len()
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCAB
                    .iter()
                    .map(|w| lower.matches(w).count() as f32)
                    .collect()
            })
            .collect())
    }
}

struct Scripted;

#[async_trait]
impl ChatModel for Scripted {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        if request.system.contains("Paris is the capital of France.") {
            Ok("Paris.".to_string())
        } else {
            Ok("I don't know.".to_string())
        }
    }

    async fn complete_structured(
        &self,
        _request: &ChatRequest,
        _schema: &OutputSchema,
    ) -> Result<Value, GenerationError> {
        Ok(json!({"query": "capital of Germany"}))
    }
}

struct StubCatalog;

impl ModelCatalog for StubCatalog {
    fn chat_model(&self, _spec: &str) -> Result<Arc<dyn ChatModel>, GenerationError> {
        Ok(Arc::new(Scripted))
    }

    fn embedder(&self, _spec: &str) -> Result<Arc<dyn Embedder>, EmbeddingError> {
        Ok(Arc::new(KeywordEmbedder))
    }
}

fn config(root: &Path) -> Config {
    Config {
        db: DbConfig {
            path: root.join("data").join("briefly.sqlite"),
        },
        models: Default::default(),
        retrieval: Default::default(),
        conversation: Default::default(),
    }
}

fn record(fields: DocumentFields, url: &str, published_at: i64) -> ArticleRecord {
    ArticleRecord {
        fields,
        source: Some("test".to_string()),
        url: Some(url.to_string()),
        published_at: Some(json!(published_at)),
    }
}

async fn seeded(root: &Path) -> Config {
    let cfg = config(root);
    let pool = db::connect(&cfg).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();

    let records = vec![
        record(
            DocumentFields {
                content: Some("Paris is the capital of France.".into()),
                ..Default::default()
            },
            "https://news/1",
            100,
        ),
        record(
            DocumentFields {
                content: Some(String::new()),
                text: Some("Berlin is the capital of Germany.".into()),
                ..Default::default()
            },
            "https://news/2",
            200,
        ),
        record(
            DocumentFields {
                title: Some("Markets rally in Paris".into()),
                ..Default::default()
            },
            "https://news/3",
            300,
        ),
        record(DocumentFields::default(), "https://news/empty", 400),
    ];
    let stats = import_records(&pool, records, &KeywordEmbedder, 2).await.unwrap();
    assert_eq!((stats.read, stats.imported, stats.skipped), (4, 3, 1));
    pool.close().await;
    cfg
}

#[tokio::test]
async fn test_sqlite_retriever_ranks_and_resolves_fields() {
    let tmp = TempDir::new().unwrap();
    let cfg = seeded(tmp.path()).await;
    let provider = SqliteRetrieverProvider::new(cfg.db.path.clone());

    let retriever = provider
        .open(
            Arc::new(KeywordEmbedder),
            SearchParams {
                k: 2,
                num_candidates: 100,
            },
        )
        .await
        .unwrap();
    let docs = retriever.search("capital of germany").await.unwrap();
    retriever.close().await;

    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].content, "Berlin is the capital of Germany.");
    assert!(docs[0].score >= docs[1].score);
}

#[tokio::test]
async fn test_nearest_article_found_regardless_of_recency() {
    let tmp = TempDir::new().unwrap();
    let cfg = seeded(tmp.path()).await;
    let provider = SqliteRetrieverProvider::new(cfg.db.path.clone());

    // The best match is the oldest article and the pool is smaller than the corpus.
    let retriever = provider
        .open(
            Arc::new(KeywordEmbedder),
            SearchParams {
                k: 1,
                num_candidates: 2,
            },
        )
        .await
        .unwrap();
    let docs = retriever.search("capital of france paris").await.unwrap();
    retriever.close().await;

    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].content, "Paris is the capital of France.");
}

/// Same dimensionality as [`KeywordEmbedder`], unrelated vector space.
struct OtherModel;

#[async_trait]
impl Embedder for OtherModel {
    fn model_name(&self) -> &str {
        "other"
    }

    fn dims(&self) -> usize {
        VOCAB.len()
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|_| vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0])
            .collect())
    }
}

#[tokio::test]
async fn test_articles_from_other_embedding_models_are_ignored() {
    let tmp = TempDir::new().unwrap();
    let cfg = seeded(tmp.path()).await;
    let pool = db::connect(&cfg).await.unwrap();
    let foreign = vec![record(
        DocumentFields {
            content: Some("Markets markets markets".into()),
            ..Default::default()
        },
        "https://news/foreign",
        500,
    )];
    import_records(&pool, foreign, &OtherModel, 8).await.unwrap();
    pool.close().await;

    let retriever = SqliteRetrieverProvider::new(cfg.db.path.clone())
        .open(
            Arc::new(KeywordEmbedder),
            SearchParams {
                k: 4,
                num_candidates: 100,
            },
        )
        .await
        .unwrap();
    let docs = retriever.search("paris").await.unwrap();
    retriever.close().await;

    assert_eq!(docs.len(), 3);
    assert!(docs.iter().all(|d| d.content != "Markets markets markets"));
    assert!(docs.iter().all(|d| d.score < 1.0));
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let cfg = seeded(tmp.path()).await;
    let pool = db::connect(&cfg).await.unwrap();

    let again = vec![record(
        DocumentFields {
            content: Some("Paris is the capital of France.".into()),
            ..Default::default()
        },
        "https://news/1",
        100,
    )];
    import_records(&pool, again, &KeywordEmbedder, 8).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 3);
    pool.close().await;
}

#[tokio::test]
async fn test_dimension_mismatch_is_malformed() {
    /// Claims the stored model's name but produces shorter vectors.
    struct Wide;

    #[async_trait]
    impl Embedder for Wide {
        fn model_name(&self) -> &str {
            "keyword"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    let tmp = TempDir::new().unwrap();
    let cfg = seeded(tmp.path()).await;
    let retriever = SqliteRetrieverProvider::new(cfg.db.path.clone())
        .open(
            Arc::new(Wide),
            SearchParams {
                k: 4,
                num_candidates: 10,
            },
        )
        .await
        .unwrap();
    let err = retriever.search("anything").await.unwrap_err();
    retriever.close().await;
    assert!(matches!(err, RetrievalError::Malformed(_)));
}

#[tokio::test]
async fn test_missing_database_is_unavailable() {
    let tmp = TempDir::new().unwrap();
    let provider = SqliteRetrieverProvider::new(tmp.path().join("absent.sqlite"));
    let err = provider
        .open(
            Arc::new(KeywordEmbedder),
            SearchParams {
                k: 4,
                num_candidates: 10,
            },
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RetrievalError::Unavailable(_)));
}

#[tokio::test]
async fn test_conversation_survives_reopening_the_database() {
    let tmp = TempDir::new().unwrap();
    let cfg = seeded(tmp.path()).await;
    let conversation = cfg.conversation_config("alice", "thread-1");

    {
        let pool = db::connect(&cfg).await.unwrap();
        let graph = build_graph(&cfg, pool.clone(), Arc::new(StubCatalog));
        let reply = graph
            .run_turn("capital of France", "alice", "thread-1", &conversation)
            .await
            .unwrap();
        assert_eq!(reply, "Paris.");
        pool.close().await;
    }

    let pool = db::connect(&cfg).await.unwrap();
    let graph = build_graph(&cfg, pool.clone(), Arc::new(StubCatalog));
    graph
        .run_turn("and Germany?", "alice", "thread-1", &conversation)
        .await
        .unwrap();

    let state = graph.state("thread-1").await.unwrap().unwrap();
    assert_eq!(state.messages.len(), 4);
    assert_eq!(state.queries, vec!["capital of France", "capital of Germany"]);
    assert_eq!(
        state.retrieved_docs[0].content,
        "Berlin is the capital of Germany."
    );
    assert_eq!(state.checkpoint_id, 6);
    assert!(graph.state("thread-2").await.unwrap().is_none());
    pool.close().await;
}

#[tokio::test]
async fn test_failed_retrieval_leaves_query_checkpoint_on_disk() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(tmp.path());
    let pool = db::connect(&cfg).await.unwrap();
    migrate::migrate_pool(&pool).await.unwrap();

    // Point the retriever at a database that does not exist.
    let mut broken = cfg.clone();
    broken.db.path = tmp.path().join("missing").join("articles.sqlite");
    let graph = build_graph(&broken, pool.clone(), Arc::new(StubCatalog));

    let err = graph
        .run_turn(
            "capital of France",
            "alice",
            "t1",
            &cfg.conversation_config("alice", "t1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Retrieval { .. }));
    assert_eq!(err.stage(), Some(Stage::Retrieve));

    let history = graph.history("t1", None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].stage, Stage::GenerateQuery);
    assert_eq!(history[0].state.queries, vec!["capital of France"]);
    assert!(history[0].state.retrieved_docs.is_empty());
    pool.close().await;
}
