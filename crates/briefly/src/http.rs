//! JSON-over-HTTP transport shared by the model clients.
//!
//! Every model call is a single `POST` with a JSON body. Transient failures
//! are retried here, below the pipeline, so stages themselves never retry.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("{service} API error {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} connection error ({url}): {message}")]
    Transport {
        service: &'static str,
        url: String,
        message: String,
    },

    #[error("{service} returned invalid JSON: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

/// One configured JSON endpoint caller.
#[derive(Clone)]
pub struct JsonClient {
    client: reqwest::Client,
    service: &'static str,
    bearer: Option<String>,
    max_retries: u32,
    backoff_base: Duration,
}

impl JsonClient {
    pub fn new(
        client: reqwest::Client,
        service: &'static str,
        bearer: Option<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            client,
            service,
            bearer,
            max_retries,
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Scale every backoff delay. Tests use milliseconds instead of seconds.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// `POST` `body` to `url` and decode the JSON response, retrying
    /// transient failures.
    pub async fn post(&self, url: &str, body: &Value) -> Result<Value, HttpError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_base * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(token) = &self.bearer {
                request = request.header("Authorization", format!("Bearer {}", token));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| HttpError::Decode {
                            service: self.service,
                            message: e.to_string(),
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = HttpError::Status {
                        service: self.service,
                        status: status.as_u16(),
                        body: body_text,
                    };

                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(service = self.service, attempt, %status, "retryable API error");
                        last_err = Some(err);
                        continue;
                    }

                    return Err(err);
                }
                Err(e) => {
                    warn!(service = self.service, attempt, error = %e, "request failed");
                    last_err = Some(HttpError::Transport {
                        service: self.service,
                        url: url.to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| HttpError::Transport {
            service: self.service,
            url: url.to_string(),
            message: "request failed after retries".to_string(),
        }))
    }
}

/// Build the shared `reqwest` client with the configured timeout.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}
