//! Provider Abstraction Layer
//!
//! Shared types for the upstream completion API and the local fallback
//! generator, plus the backend trait the orchestrator drives.

pub mod local;
pub mod openrouter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// A single chat message in the provider wire format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: "system".into(), content: MessageContent::Text(text.into()) }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: "user".into(), content: MessageContent::Text(text.into()) }
    }

    pub fn user_with_image(text: impl Into<String>, image_data_url: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl { image_url: ImageUrl { url: image_data_url.into() } },
            ]),
        }
    }
}

/// Message content: plain text, or typed parts for vision-capable models
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// True when any part of the content is an image
    pub fn has_image(&self) -> bool {
        match self {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => {
                parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. }))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One logical completion request, immutable once constructed
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// Raw image bytes (PNG), attached by the paper-solver flow
    pub image: Option<Vec<u8>>,
    /// Optional caller preference for the primary text model
    pub model_hint: Option<String>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            image: None,
            model_hint: None,
        }
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_model_hint(mut self, model: impl Into<String>) -> Self {
        self.model_hint = Some(model.into());
        self
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Classified result of one physical call against one model
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// Completion text came back
    Success(String),
    /// Upstream rate limit (HTTP 429)
    Throttled,
    /// Upstream rejected the model identifier
    InvalidModel(ApiError),
    /// Network/IO failure or malformed response; not a throttling signal
    TransportError(ApiError),
}

/// The seam between the orchestrator and the upstream provider. One call,
/// one classified outcome; retries and fallback live above this trait.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn execute(&self, model: &str, messages: &[ChatMessage]) -> AttemptOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_part_wire_format() {
        let msg = ChatMessage::user_with_image("solve this", "data:image/png;base64,AAAA");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_plain_text_serializes_as_string() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn test_has_image() {
        assert!(!ChatMessage::user("x").content.has_image());
        assert!(ChatMessage::user_with_image("x", "data:...").content.has_image());
    }
}
