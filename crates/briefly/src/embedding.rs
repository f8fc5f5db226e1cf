//! Embedding backends.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`OpenAIEmbedder`]** calls `POST /v1/embeddings`.
//! - **[`OllamaEmbedder`]** calls `POST /api/embed` on a local Ollama instance.
//! - **`LocalEmbedder`** runs models in-process via fastembed
//!   (`--features local-embeddings-fastembed`).
//!
//! Inputs larger than `models.batch_size` are split into several requests.
//! Transient HTTP failures are retried by [`JsonClient`].

use async_trait::async_trait;
use serde_json::{json, Value};

use briefly_core::chat::ModelSpec;
use briefly_core::embedding::Embedder;
use briefly_core::error::EmbeddingError;

use crate::config::ModelsConfig;
use crate::http::JsonClient;

fn parse_vector(value: &Value, service: &str) -> Result<Vec<f32>, EmbeddingError> {
    value
        .as_array()
        .ok_or_else(|| {
            EmbeddingError::InvalidResponse(format!("{service}: embedding is not an array"))
        })?
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                EmbeddingError::InvalidResponse(format!("{service}: non-numeric embedding value"))
            })
        })
        .collect()
}

fn check_count(
    service: &str,
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::InvalidResponse(format!(
            "{service}: expected {expected} embeddings, got {}",
            vectors.len()
        )));
    }
    Ok(vectors)
}

// ============ OpenAI ============

/// Embedder using the OpenAI embeddings API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    http: JsonClient,
    base_url: String,
    model: String,
    dims: usize,
    batch_size: usize,
}

impl OpenAIEmbedder {
    pub fn new(http: JsonClient, model: &str, config: &ModelsConfig) -> Self {
        Self {
            http,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dims: config.dims.unwrap_or(0),
            batch_size: config.batch_size.max(1),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = json!({
            "model": self.model,
            "input": texts,
        });
        let json = self
            .http
            .post(&format!("{}/v1/embeddings", self.base_url), &body)
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;
        check_count("OpenAI", texts.len(), parse_openai_response(&json)?)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        EmbeddingError::InvalidResponse("OpenAI: missing data array".to_string())
    })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        let embedding = item.get("embedding").ok_or_else(|| {
            EmbeddingError::InvalidResponse("OpenAI: missing embedding".to_string())
        })?;
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

// ============ Ollama ============

/// Embedder using a local Ollama instance.
///
/// Requires Ollama to be running with the model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    http: JsonClient,
    url: String,
    model: String,
    dims: usize,
    batch_size: usize,
}

impl OllamaEmbedder {
    pub fn new(http: JsonClient, model: &str, config: &ModelsConfig) -> Self {
        Self {
            http,
            url: config.ollama_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dims: config.dims.unwrap_or(0),
            batch_size: config.batch_size.max(1),
        }
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbeddingError::InvalidResponse("Ollama: missing embeddings array".to_string())
        })?
        .iter()
        .map(|e| parse_vector(e, "Ollama"))
        .collect()
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = json!({
                "model": self.model,
                "input": batch,
            });
            let json = self
                .http
                .post(&format!("{}/api/embed", self.url), &body)
                .await
                .map_err(|e| EmbeddingError::Request(e.to_string()))?;
            out.extend(check_count("Ollama", batch.len(), parse_ollama_response(&json)?)?);
        }
        Ok(out)
    }
}

// ============ Local (fastembed) ============

/// Embedder running a model in-process through fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(model_name: &str, config: &ModelsConfig) -> Result<Self, EmbeddingError> {
        let (model, default_dims) = match model_name {
            "all-minilm-l6-v2" => (fastembed::EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (fastembed::EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (fastembed::EmbeddingModel::BGEBaseENV15, 768),
            "bge-large-en-v1.5" => (fastembed::EmbeddingModel::BGELargeENV15, 1024),
            "nomic-embed-text-v1.5" => (fastembed::EmbeddingModel::NomicEmbedTextV15, 768),
            other => {
                return Err(EmbeddingError::NotConfigured(format!(
                    "unknown local embedding model '{other}'. Supported: all-minilm-l6-v2, \
                     bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1.5"
                )))
            }
        };
        Ok(Self {
            model_name: model_name.to_string(),
            model,
            dims: config.dims.unwrap_or(default_dims),
            batch_size: config.batch_size.max(1),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model).with_show_download_progress(false),
            )
            .map_err(|e| EmbeddingError::NotConfigured(format!("local model init failed: {e}")))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| EmbeddingError::Request(format!("local embedding failed: {e}")))
        })
        .await
        .map_err(|e| EmbeddingError::Request(format!("local embedding task failed: {e}")))?
    }
}

/// Construct the embedder named by `spec`.
///
/// # Supported Providers
///
/// | Provider | Embedder |
/// |----------|----------|
/// | `openai` | [`OpenAIEmbedder`] (needs `OPENAI_API_KEY`) |
/// | `ollama` | [`OllamaEmbedder`] |
/// | `local` | `LocalEmbedder` (needs `--features local-embeddings-fastembed`) |
pub fn create_embedder(
    spec: &ModelSpec,
    config: &ModelsConfig,
    client: &reqwest::Client,
    openai_key: Option<&str>,
) -> Result<Box<dyn Embedder>, EmbeddingError> {
    match spec.provider.as_str() {
        "openai" => {
            let key = openai_key.ok_or_else(|| {
                EmbeddingError::NotConfigured(
                    "OPENAI_API_KEY environment variable not set".to_string(),
                )
            })?;
            let http = JsonClient::new(
                client.clone(),
                "OpenAI",
                Some(key.to_string()),
                config.max_retries,
            );
            Ok(Box::new(OpenAIEmbedder::new(http, &spec.model, config)))
        }
        "ollama" => {
            let http = JsonClient::new(client.clone(), "Ollama", None, config.max_retries);
            Ok(Box::new(OllamaEmbedder::new(http, &spec.model, config)))
        }
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalEmbedder::new(&spec.model, config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(EmbeddingError::NotConfigured(
            "local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(EmbeddingError::NotConfigured(format!(
            "unknown embedding provider '{other}' in '{spec}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn models(base: &str) -> ModelsConfig {
        ModelsConfig {
            openai_base_url: base.to_string(),
            ollama_url: base.to_string(),
            batch_size: 2,
            max_retries: 0,
            ..Default::default()
        }
    }

    fn http(service: &'static str) -> JsonClient {
        JsonClient::new(reqwest::Client::new(), service, Some("sk".into()), 0)
            .with_backoff_base(Duration::from_millis(1))
    }

    #[test]
    fn test_openai_response_reordered_by_index() {
        let json = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_openai_response_missing_data_is_invalid() {
        let err = parse_openai_response(&json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_openai_batches_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"model": "text-embedding-3-small"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 0, "embedding": [0.5, 0.5]},
                    {"index": 1, "embedding": [0.25, 0.75]}
                ]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let embedder =
            OpenAIEmbedder::new(http("OpenAI"), "text-embedding-3-small", &models(&server.uri()));
        let texts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let vecs = embedder.embed_texts(&texts).await.unwrap();
        assert_eq!(vecs.len(), 3);
        assert_eq!(vecs[2], vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_ollama_embed_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(json!({"model": "nomic-embed-text"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.1, 0.2, 0.3]]})),
            )
            .mount(&server)
            .await;

        let embedder =
            OllamaEmbedder::new(http("Ollama"), "nomic-embed-text", &models(&server.uri()));
        let v = embedder.embed_query("hello").await.unwrap();
        assert_eq!(v.len(), 3);
    }

    #[tokio::test]
    async fn test_count_mismatch_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": []})))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::new(http("Ollama"), "m", &models(&server.uri()));
        let err = embedder.embed_query("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidResponse(_)));
    }

    #[test]
    fn test_openai_requires_api_key() {
        let spec: ModelSpec = "openai/text-embedding-3-small".parse().unwrap();
        let result = create_embedder(&spec, &ModelsConfig::default(), &reqwest::Client::new(), None);
        assert!(matches!(result, Err(EmbeddingError::NotConfigured(_))));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let spec: ModelSpec = "acme/embed".parse().unwrap();
        let result = create_embedder(
            &spec,
            &ModelsConfig::default(),
            &reqwest::Client::new(),
            Some("sk"),
        );
        assert!(matches!(result, Err(EmbeddingError::NotConfigured(_))));
    }
}
