//! OpenRouter Client
//!
//! HTTP client for the OpenRouter chat-completions API. Executes a single
//! call and classifies the result; all retry, cooldown, and fallback
//! decisions belong to the orchestrator.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;
use crate::providers::{AttemptOutcome, ChatMessage, CompletionBackend};

/// Per-call timeout for upstream requests
const REQUEST_TIMEOUT_SECS: u64 = 90;

/// Response structures for JSON parsing
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<Choice>>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenRouter chat-completions client
#[derive(Clone)]
pub struct OpenRouterClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    /// Pull the completion text out of a 2xx body. A body without the
    /// expected shape is a transport-level failure, not a provider signal.
    fn extract_answer(body: &str) -> AttemptOutcome {
        match serde_json::from_str::<ChatResponse>(body) {
            Ok(parsed) => {
                let content = parsed
                    .choices
                    .and_then(|mut c| if c.is_empty() { None } else { c.remove(0).message })
                    .and_then(|m| m.content);
                match content {
                    Some(text) if !text.trim().is_empty() => AttemptOutcome::Success(text),
                    _ => AttemptOutcome::TransportError(ApiError::unknown(
                        "completion response had no message content",
                    )),
                }
            }
            Err(e) => AttemptOutcome::TransportError(ApiError::unknown(format!(
                "unparseable completion response: {}",
                e
            ))),
        }
    }
}

/// Map an HTTP error status + body onto an attempt outcome.
///
/// 429 is the provider throttling signal. A 400/404 whose message points at
/// the model identifier means the identifier itself is bad and worth
/// repairing; every other non-2xx is infrastructure trouble and must not
/// trip a cooldown.
pub fn classify_error_status(status: StatusCode, body: &str) -> AttemptOutcome {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return AttemptOutcome::Throttled;
    }
    if matches!(status, StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND) && mentions_model(body) {
        return AttemptOutcome::InvalidModel(ApiError::invalid_model(format!(
            "{}: {}",
            status, body
        )));
    }
    if status.is_server_error() {
        return AttemptOutcome::TransportError(ApiError::server(format!("{}: {}", status, body)));
    }
    AttemptOutcome::TransportError(ApiError::unknown(format!("{}: {}", status, body)))
}

fn mentions_model(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("model")
        && (lower.contains("not found")
            || lower.contains("invalid")
            || lower.contains("not a valid")
            || lower.contains("does not exist"))
}

#[async_trait]
impl CompletionBackend for OpenRouterClient {
    async fn execute(&self, model: &str, messages: &[ChatMessage]) -> AttemptOutcome {
        let url = format!("{}/chat/completions", self.base_url);
        let request_body = serde_json::json!({
            "model": model,
            "messages": messages,
        });

        debug!(model, message_count = messages.len(), "sending completion request");

        let resp = match self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return AttemptOutcome::TransportError(ApiError::timeout(format!(
                    "request to {} timed out",
                    url
                )));
            }
            Err(e) => {
                return AttemptOutcome::TransportError(ApiError::network(format!(
                    "request failed: {}",
                    e
                )));
            }
        };

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if status.is_success() {
            Self::extract_answer(&body)
        } else {
            classify_error_status(status, &body)
        }
    }
}
