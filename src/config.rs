//! Runtime configuration
//!
//! Everything is driven by environment variables so the engine can be
//! deployed next to the rest of the backend without a config file.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AiError, AiResult};

/// Default text model pool (single entry unless overridden)
pub const DEFAULT_TEXT_MODEL: &str = "meta-llama/llama-3.2-3b-instruct:free";

/// Default vision-capable model for requests that carry an image
pub const DEFAULT_VISION_MODEL: &str = "meta-llama/llama-3.2-11b-vision-instruct:free";

/// Default fallback chain tried after the primary
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &[
    "mistralai/mistral-7b-instruct:free",
    "google/gemma-2-9b-it:free",
];

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Engine configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter bearer token; None means cloud calls will fail over to the
    /// degraded path
    pub api_key: Option<String>,
    /// OpenRouter API base URL
    pub base_url: String,
    /// Round-robin pool of primary text models
    pub primary_models: Vec<String>,
    /// Model used whenever a request carries an image
    pub vision_model: String,
    /// Fallback models tried after the primary
    pub fallback_models: Vec<String>,
    /// Response cache capacity
    pub cache_size: usize,
    /// Outbound call budget per rolling 60s window
    pub requests_per_minute: usize,
    /// Cooldown base delay after a throttled attempt
    pub cooldown_base: Duration,
    /// Cooldown upper bound
    pub cooldown_max: Duration,
    /// Retry backoff base delay
    pub backoff_base: Duration,
    /// Path to the local GGUF model for degraded answers
    pub local_model_path: PathBuf,
    /// Generation length cap for the local model
    pub local_max_tokens: usize,
    /// Restrict the chain to the primary model only
    pub disable_fallbacks: bool,
    /// Try the local model before any cloud call
    pub prefer_local: bool,
}

impl Config {
    /// Load configuration from environment variables. Unset variables fall
    /// back to defaults; a variable that is set but unparseable is a hard
    /// configuration error rather than a silent default.
    pub fn from_env() -> AiResult<Self> {
        Ok(Self {
            api_key: env_string("OPENROUTER_KEY"),
            base_url: env_string("OPENROUTER_BASE").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            primary_models: env_list("EXAMLY_PRIMARY_MODELS")
                .unwrap_or_else(|| vec![DEFAULT_TEXT_MODEL.into()]),
            vision_model: env_string("EXAMLY_VISION_MODEL")
                .unwrap_or_else(|| DEFAULT_VISION_MODEL.into()),
            fallback_models: env_list("EXAMLY_FALLBACK_MODELS").unwrap_or_else(|| {
                DEFAULT_FALLBACK_MODELS.iter().map(|m| (*m).into()).collect()
            }),
            cache_size: env_parse("EXAMLY_CACHE_SIZE")?.unwrap_or(100),
            requests_per_minute: env_parse("EXAMLY_REQUESTS_PER_MINUTE")?.unwrap_or(30),
            cooldown_base: Duration::from_secs(
                env_parse("EXAMLY_COOLDOWN_BASE_SECS")?.unwrap_or(10),
            ),
            cooldown_max: Duration::from_secs(
                env_parse("EXAMLY_COOLDOWN_MAX_SECS")?.unwrap_or(300),
            ),
            backoff_base: Duration::from_millis(
                env_parse("EXAMLY_BACKOFF_BASE_MS")?.unwrap_or(500),
            ),
            local_model_path: env_string("EXAMLY_LOCAL_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_model_path),
            local_max_tokens: env_parse("EXAMLY_LOCAL_MAX_TOKENS")?.unwrap_or(512),
            disable_fallbacks: env_flag("EXAMLY_DISABLE_FALLBACKS"),
            prefer_local: env_flag("EXAMLY_PREFER_LOCAL"),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.into(),
            primary_models: vec![DEFAULT_TEXT_MODEL.into()],
            vision_model: DEFAULT_VISION_MODEL.into(),
            fallback_models: DEFAULT_FALLBACK_MODELS.iter().map(|m| (*m).into()).collect(),
            cache_size: 100,
            requests_per_minute: 30,
            cooldown_base: Duration::from_secs(10),
            cooldown_max: Duration::from_secs(300),
            backoff_base: Duration::from_millis(500),
            local_model_path: default_model_path(),
            local_max_tokens: 512,
            disable_fallbacks: false,
            prefer_local: false,
        }
    }
}

/// Default GGUF location: <data_dir>/examly/models/model.gguf
pub fn default_model_path() -> PathBuf {
    let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    data_dir.join("examly").join("models").join("model.gguf")
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Comma-separated list, trimmed, empty entries dropped
fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = env_string(name)?;
    let entries = split_list(&raw);
    if entries.is_empty() { None } else { Some(entries) }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> AiResult<Option<T>> {
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| AiError::Config(format!("{} has invalid value {:?}", name, raw))),
        None => Ok(None),
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        env_string(name).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
