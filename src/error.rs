//! Examly Error Types
//!
//! Centralized error handling for the completion engine.

use std::fmt;

/// Main error type for completion operations
#[derive(Debug)]
pub enum AiError {
    /// Caller-side contract violation (no prompt and no image)
    InvalidRequest(String),
    /// Local admission control refused the outbound call
    RateLimited,
    /// Upstream API errors
    Api(ApiError),
    /// Local model/inference errors
    Model(ModelError),
    /// Configuration errors
    Config(String),
}

impl fmt::Display for AiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiError::InvalidRequest(msg) => write!(f, "Invalid Request: {}", msg),
            AiError::RateLimited => {
                write!(f, "Rate Limited: local request budget exhausted, try again shortly")
            }
            AiError::Api(e) => write!(f, "API Error: {}", e),
            AiError::Model(e) => write!(f, "Model Error: {}", e),
            AiError::Config(msg) => write!(f, "Config Error: {}", msg),
        }
    }
}

impl std::error::Error for AiError {}

/// Upstream API errors
#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    RateLimit,
    InvalidModel,
    Network,
    Timeout,
    ServerError,
    Unknown,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {} (retryable: {})", self.code, self.message, self.retryable)
    }
}

impl ApiError {
    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self {
            code: ApiErrorCode::RateLimit,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self {
            code: ApiErrorCode::InvalidModel,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            code: ApiErrorCode::Network,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            code: ApiErrorCode::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self {
            code: ApiErrorCode::ServerError,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            code: ApiErrorCode::Unknown,
            message: message.into(),
            retryable: false,
        }
    }
}

/// Local model/inference errors
#[derive(Debug, Clone)]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    NotLoaded,
    LoadFailed,
    InferenceFailed,
    Unavailable,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl ModelError {
    pub fn not_loaded() -> Self {
        Self {
            kind: ModelErrorKind::NotLoaded,
            message: "Model is not loaded".into(),
        }
    }

    pub fn load_failed(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::LoadFailed,
            message: message.into(),
        }
    }

    pub fn inference_failed(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::InferenceFailed,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Unavailable,
            message: message.into(),
        }
    }
}

impl From<ApiError> for AiError {
    fn from(err: ApiError) -> Self {
        AiError::Api(err)
    }
}

impl From<ModelError> for AiError {
    fn from(err: ModelError) -> Self {
        AiError::Model(err)
    }
}

/// Result type alias for completion operations
pub type AiResult<T> = Result<T, AiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_retryable() {
        let err = ApiError::rate_limit("429 from upstream");
        assert_eq!(err.code, ApiErrorCode::RateLimit);
        assert!(err.retryable);
    }

    #[test]
    fn test_invalid_model_is_not_retryable() {
        let err = ApiError::invalid_model("no such model");
        assert!(!err.retryable);
    }

    #[test]
    fn test_display_includes_message() {
        let err = AiError::Api(ApiError::network("connection reset"));
        assert!(err.to_string().contains("connection reset"));
    }
}
