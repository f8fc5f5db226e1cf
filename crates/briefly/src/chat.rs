//! Chat-completion backends.
//!
//! - **[`OpenAIChat`]** calls `POST /v1/chat/completions`. Structured output
//!   uses `response_format: {"type": "json_schema", ..., "strict": true}`.
//! - **[`OllamaChat`]** calls `POST /api/chat` with `stream: false`.
//!   Structured output passes the JSON Schema as `format`.
//!
//! The system prompt is sent as the first message, followed by the
//! conversation history in order.

use async_trait::async_trait;
use serde_json::{json, Value};

use briefly_core::chat::{ChatModel, ChatRequest, ModelSpec, OutputSchema};
use briefly_core::error::GenerationError;

use crate::config::ModelsConfig;
use crate::http::JsonClient;

fn wire_messages(request: &ChatRequest) -> Vec<Value> {
    std::iter::once(json!({"role": "system", "content": request.system}))
        .chain(
            request
                .messages
                .iter()
                .map(|m| json!({"role": m.role.as_str(), "content": m.content})),
        )
        .collect()
}

fn parse_structured(text: &str, schema: &OutputSchema) -> Result<Value, GenerationError> {
    let value: Value = serde_json::from_str(text).map_err(|e| GenerationError::Schema {
        schema: schema.name.clone(),
        message: format!("reply is not JSON: {e}"),
    })?;
    if !value.is_object() {
        return Err(GenerationError::Schema {
            schema: schema.name.clone(),
            message: "reply is not a JSON object".to_string(),
        });
    }
    Ok(value)
}

// ============ OpenAI ============

/// Chat model served by the OpenAI chat-completions API.
pub struct OpenAIChat {
    http: JsonClient,
    base_url: String,
    model: String,
}

impl OpenAIChat {
    pub fn new(http: JsonClient, model: &str, config: &ModelsConfig) -> Self {
        Self {
            http,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    async fn send(&self, body: Value) -> Result<String, GenerationError> {
        let json = self
            .http
            .post(&format!("{}/v1/chat/completions", self.base_url), &body)
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;
        parse_openai_reply(&json)
    }
}

/// Extract `choices[0].message.content`. A refusal is an error.
fn parse_openai_reply(json: &Value) -> Result<String, GenerationError> {
    let message = json
        .pointer("/choices/0/message")
        .ok_or(GenerationError::EmptyResponse)?;
    if let Some(refusal) = message.get("refusal").and_then(|r| r.as_str()) {
        return Err(GenerationError::Request(format!("model refused: {refusal}")));
    }
    message
        .get("content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or(GenerationError::EmptyResponse)
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        self.send(json!({
            "model": self.model,
            "messages": wire_messages(request),
        }))
        .await
    }

    async fn complete_structured(
        &self,
        request: &ChatRequest,
        schema: &OutputSchema,
    ) -> Result<Value, GenerationError> {
        let text = self
            .send(json!({
                "model": self.model,
                "messages": wire_messages(request),
                "response_format": {
                    "type": "json_schema",
                    "json_schema": {
                        "name": schema.name,
                        "description": schema.description,
                        "schema": schema.schema,
                        "strict": true
                    }
                }
            }))
            .await?;
        parse_structured(&text, schema)
    }
}

// ============ Ollama ============

/// Chat model served by a local Ollama instance.
pub struct OllamaChat {
    http: JsonClient,
    url: String,
    model: String,
}

impl OllamaChat {
    pub fn new(http: JsonClient, model: &str, config: &ModelsConfig) -> Self {
        Self {
            http,
            url: config.ollama_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    async fn send(&self, body: Value) -> Result<String, GenerationError> {
        let json = self
            .http
            .post(&format!("{}/api/chat", self.url), &body)
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or(GenerationError::EmptyResponse)
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        self.send(json!({
            "model": self.model,
            "messages": wire_messages(request),
            "stream": false,
        }))
        .await
    }

    async fn complete_structured(
        &self,
        request: &ChatRequest,
        schema: &OutputSchema,
    ) -> Result<Value, GenerationError> {
        let text = self
            .send(json!({
                "model": self.model,
                "messages": wire_messages(request),
                "stream": false,
                "format": schema.schema,
            }))
            .await?;
        parse_structured(&text, schema)
    }
}

/// Construct the chat model named by `spec`.
pub fn create_chat_model(
    spec: &ModelSpec,
    config: &ModelsConfig,
    client: &reqwest::Client,
    openai_key: Option<&str>,
) -> Result<Box<dyn ChatModel>, GenerationError> {
    match spec.provider.as_str() {
        "openai" => {
            let key = openai_key.ok_or_else(|| {
                GenerationError::Request("OPENAI_API_KEY environment variable not set".to_string())
            })?;
            let http = JsonClient::new(
                client.clone(),
                "OpenAI",
                Some(key.to_string()),
                config.max_retries,
            );
            Ok(Box::new(OpenAIChat::new(http, &spec.model, config)))
        }
        "ollama" => {
            let http = JsonClient::new(client.clone(), "Ollama", None, config.max_retries);
            Ok(Box::new(OllamaChat::new(http, &spec.model, config)))
        }
        _ => Err(GenerationError::UnsupportedModel(spec.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefly_core::models::Message;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn models(base: &str) -> ModelsConfig {
        ModelsConfig {
            openai_base_url: base.to_string(),
            ollama_url: base.to_string(),
            max_retries: 0,
            ..Default::default()
        }
    }

    fn http() -> JsonClient {
        JsonClient::new(reqwest::Client::new(), "Test", Some("sk".into()), 0)
            .with_backoff_base(Duration::from_millis(1))
    }

    fn request() -> ChatRequest {
        ChatRequest {
            system: "You are terse.".to_string(),
            messages: vec![Message::user("What is the capital of France?")],
        }
    }

    fn schema() -> OutputSchema {
        OutputSchema {
            name: "search_query".to_string(),
            description: "query".to_string(),
            schema: json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        }
    }

    #[test]
    fn test_wire_messages_start_with_system() {
        let msgs = wire_messages(&request());
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["role"], "user");
        assert_eq!(msgs[1]["content"], "What is the capital of France?");
    }

    #[tokio::test]
    async fn test_openai_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Paris."}}]
            })))
            .mount(&server)
            .await;

        let model = OpenAIChat::new(http(), "gpt-4o-mini", &models(&server.uri()));
        assert_eq!(model.complete(&request()).await.unwrap(), "Paris.");
    }

    #[tokio::test]
    async fn test_openai_structured_sends_strict_schema() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "response_format": {
                    "type": "json_schema",
                    "json_schema": {"name": "search_query", "strict": true}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "{\"query\": \"capital of France\"}"}}]
            })))
            .mount(&server)
            .await;

        let model = OpenAIChat::new(http(), "gpt-4o-mini", &models(&server.uri()));
        let value = model
            .complete_structured(&request(), &schema())
            .await
            .unwrap();
        assert_eq!(value["query"], "capital of France");
    }

    #[tokio::test]
    async fn test_openai_non_json_structured_reply_is_schema_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "capital of France"}}]
            })))
            .mount(&server)
            .await;

        let model = OpenAIChat::new(http(), "gpt-4o-mini", &models(&server.uri()));
        let err = model
            .complete_structured(&request(), &schema())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Schema { .. }));
    }

    #[test]
    fn test_openai_refusal_is_error() {
        let err = parse_openai_reply(&json!({
            "choices": [{"message": {"content": null, "refusal": "no"}}]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("refused"));
    }

    #[tokio::test]
    async fn test_ollama_structured_passes_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"stream": false, "format": {"type": "object"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "{\"query\": \"paris\"}"}
            })))
            .mount(&server)
            .await;

        let model = OllamaChat::new(http(), "llama3.1", &models(&server.uri()));
        let value = model
            .complete_structured(&request(), &schema())
            .await
            .unwrap();
        assert_eq!(value["query"], "paris");
    }

    #[test]
    fn test_local_provider_has_no_chat_models() {
        let spec: ModelSpec = "local/anything".parse().unwrap();
        let result = create_chat_model(&spec, &ModelsConfig::default(), &reqwest::Client::new(), None);
        assert!(matches!(result, Err(GenerationError::UnsupportedModel(_))));
    }
}
