//! Examly completion engine
//!
//! Resilient orchestration for every call the exam-prep backend makes to an
//! external language-model provider: caching, local rate limiting, per-model
//! cooldowns, a multi-model fallback chain, adaptive payload shrinking, and
//! a degraded answer path that keeps the engine total.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod providers;

pub use config::Config;
pub use error::{AiError, AiResult};
pub use orchestrator::Orchestrator;
pub use providers::CompletionRequest;
