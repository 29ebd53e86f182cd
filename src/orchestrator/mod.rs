//! Request Orchestrator
//!
//! The reliability core: turns an unreliable, rate-limited, multi-model
//! upstream into a call that always returns something useful. Owns the
//! response cache, the local rate window, the per-model cooldowns, and the
//! round-robin selector; runs the attempt loop with retry, backoff,
//! adaptive truncation, identifier repair, and the degraded fall-through.

mod cache;
mod cooldown;
mod degraded;
mod rate_limit;
mod selector;

#[cfg(test)]
mod orchestrator_test;

pub use cache::ResponseCache;
pub use cooldown::CooldownRegistry;
pub use degraded::DegradedAnswerGenerator;
pub use rate_limit::RateLimiter;
pub use selector::ModelSelector;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AiError, AiResult};
use crate::providers::local::LocalGenerator;
use crate::providers::openrouter::OpenRouterClient;
use crate::providers::{AttemptOutcome, ChatMessage, CompletionBackend, CompletionRequest, ContentPart, MessageContent};

/// Attempts per model before advancing down the chain. Fixed, not
/// configurable: it bounds worst-case latency of a single request.
const MAX_ATTEMPTS_PER_MODEL: u32 = 3;

/// Content longer than this is shrunk after the first throttle on a model
const SHRINK_THRESHOLD_CHARS: usize = 4000;

/// Shrunk content keeps this leading slice
const SHRINK_KEEP_CHARS: usize = 2000;

const TRUNCATION_MARKER: &str = "\n[content truncated to reduce request size]";

/// The completion engine. One instance per process, shared via `Arc`;
/// every piece of shared state sits behind its own short-lived mutex and
/// no lock is held across an await point.
pub struct Orchestrator {
    backend: Arc<dyn CompletionBackend>,
    degraded: DegradedAnswerGenerator,
    cache: Mutex<ResponseCache>,
    limiter: Mutex<RateLimiter>,
    cooldowns: Mutex<CooldownRegistry>,
    selector: Mutex<ModelSelector>,
    backoff_base: Duration,
    prefer_local: bool,
}

impl Orchestrator {
    /// Build the production engine: OpenRouter upstream plus the local
    /// GGUF generator for degraded answers.
    pub fn new(config: Config) -> Self {
        let backend = Arc::new(OpenRouterClient::new(
            config.api_key.clone().unwrap_or_default(),
            config.base_url.clone(),
        ));
        let local = LocalGenerator::new(config.local_model_path.clone(), config.local_max_tokens);
        Self::with_backend(config, backend, Some(local))
    }

    /// Build with an explicit backend and optional local generator. This is
    /// the seam used by tests and by embedders that bring their own client.
    pub fn with_backend(
        config: Config,
        backend: Arc<dyn CompletionBackend>,
        local: Option<LocalGenerator>,
    ) -> Self {
        Self {
            backend,
            degraded: DegradedAnswerGenerator::new(local),
            cache: Mutex::new(ResponseCache::new(config.cache_size)),
            limiter: Mutex::new(RateLimiter::new(config.requests_per_minute)),
            cooldowns: Mutex::new(CooldownRegistry::new(
                config.cooldown_base,
                config.cooldown_max,
            )),
            selector: Mutex::new(ModelSelector::new(
                config.primary_models,
                config.vision_model,
                config.fallback_models,
                config.disable_fallbacks,
            )),
            backoff_base: config.backoff_base,
            prefer_local: config.prefer_local,
        }
    }

    /// Resolve a completion. Never fails for upstream reasons; the only
    /// caller-visible errors are a malformed request and the local
    /// rate-limit hard stop.
    pub async fn complete(&self, request: &CompletionRequest) -> AiResult<String> {
        let cancel = AtomicBool::new(false);
        self.complete_with_cancel(request, &cancel).await
    }

    /// `complete` with a cancellation flag. A set flag aborts the attempt
    /// loop at the next checkpoint and falls through to the degraded
    /// generator, so no retry loop outlives the caller's interest.
    pub async fn complete_with_cancel(
        &self,
        request: &CompletionRequest,
        cancel: &AtomicBool,
    ) -> AiResult<String> {
        if request.user_prompt.trim().is_empty() && !request.has_image() {
            return Err(AiError::InvalidRequest(
                "request has no prompt and no image".into(),
            ));
        }

        let has_image = request.has_image();
        let hint = request.model_hint.as_deref();
        let primary = self.selector.lock().peek_primary(has_image, hint);

        let fingerprint = ResponseCache::fingerprint(
            &primary,
            has_image,
            &request.system_prompt,
            &request.user_prompt,
        );
        if let Some(answer) = self.cache.lock().get(&fingerprint) {
            debug!(model = %primary, "cache hit");
            return Ok(answer);
        }

        // Cache miss: commit the round-robin step. Image and hinted requests
        // never came from the pool, so the cursor stays put for those.
        if !has_image && hint.is_none() {
            self.selector.lock().advance();
        }

        let chain = {
            let selector = self.selector.lock();
            let cooldowns = self.cooldowns.lock();
            selector.chain_for(&primary, &cooldowns)
        };
        debug!(?chain, "resolved model chain");

        if self.prefer_local {
            if let Some(answer) = self
                .degraded
                .try_local(&request.system_prompt, &request.user_prompt)
                .await
            {
                return Ok(self.finish(fingerprint, answer));
            }
        }

        'models: for model in &chain {
            let mut messages = build_messages(request, model == &primary);
            let mut shrunk = false;

            for attempt in 1..=MAX_ATTEMPTS_PER_MODEL {
                if cancel.load(Ordering::Relaxed) {
                    info!("request cancelled, skipping to degraded answer");
                    break 'models;
                }
                if !self.limiter.lock().admit() {
                    warn!(model = %model, "local rate limit reached, refusing request");
                    return Err(AiError::RateLimited);
                }

                match self.backend.execute(model, &messages).await {
                    AttemptOutcome::Success(text) => {
                        info!(model = %model, attempt, "completion succeeded");
                        return Ok(self.finish(fingerprint, text));
                    }
                    AttemptOutcome::Throttled => {
                        self.cooldowns.lock().apply(model, attempt);
                        if !shrunk {
                            // First throttle on this model: shed payload
                            // weight for the remaining attempts
                            shrunk = shrink_messages(&mut messages);
                        }
                        if attempt < MAX_ATTEMPTS_PER_MODEL {
                            tokio::time::sleep(jittered_backoff(self.backoff_base, attempt)).await;
                        } else {
                            continue 'models;
                        }
                    }
                    AttemptOutcome::InvalidModel(e) => {
                        warn!(model = %model, error = %e, "model identifier rejected");
                        if let Some(text) = self.try_repair_variants(model, &messages, cancel).await? {
                            return Ok(self.finish(fingerprint, text));
                        }
                        continue 'models;
                    }
                    AttemptOutcome::TransportError(e) => {
                        warn!(model = %model, attempt, error = %e, "transport failure");
                        if attempt < MAX_ATTEMPTS_PER_MODEL {
                            tokio::time::sleep(backoff_delay(self.backoff_base, attempt)).await;
                        } else {
                            continue 'models;
                        }
                    }
                }
            }
        }

        // Chain empty, exhausted, or cancelled: the degraded generator is
        // total, and its answer is cached so identical failing requests do
        // not re-pay the whole retry bill.
        info!("model chain exhausted, producing degraded answer");
        let answer = self
            .degraded
            .generate(&request.system_prompt, &request.user_prompt)
            .await;
        Ok(self.finish(fingerprint, answer))
    }

    /// Probe syntactic repair variants of a rejected model identifier.
    /// Each probe is a physical call and pays the admission toll.
    async fn try_repair_variants(
        &self,
        model: &str,
        messages: &[ChatMessage],
        cancel: &AtomicBool,
    ) -> AiResult<Option<String>> {
        for variant in repair_variants(model) {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            if !self.limiter.lock().admit() {
                return Err(AiError::RateLimited);
            }
            match self.backend.execute(&variant, messages).await {
                AttemptOutcome::Success(text) => {
                    info!(model = %model, repaired = %variant, "model identifier repaired");
                    return Ok(Some(text));
                }
                outcome => {
                    debug!(variant = %variant, ?outcome, "repair variant failed");
                }
            }
        }
        Ok(None)
    }

    /// Clean the answer, remember it, hand it back
    fn finish(&self, fingerprint: String, raw: String) -> String {
        let answer = strip_code_fences(&raw);
        self.cache.lock().put(fingerprint, answer.clone());
        answer
    }
}

/// Build the provider payload. The image part rides along only for the
/// primary (vision) model; every other model gets text only, even mid-chain.
fn build_messages(request: &CompletionRequest, include_image: bool) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if !request.system_prompt.trim().is_empty() {
        messages.push(ChatMessage::system(request.system_prompt.clone()));
    }
    match (&request.image, include_image) {
        (Some(image), true) => {
            let data_url = format!(
                "data:image/png;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(image)
            );
            messages.push(ChatMessage::user_with_image(request.user_prompt.clone(), data_url));
        }
        _ => messages.push(ChatMessage::user(request.user_prompt.clone())),
    }
    messages
}

/// Shrink oversized message content in place: keep the leading slice plus a
/// marker. Returns true when anything changed.
fn shrink_messages(messages: &mut [ChatMessage]) -> bool {
    let mut changed = false;
    for message in messages.iter_mut() {
        match &mut message.content {
            MessageContent::Text(text) => changed |= shrink_text(text),
            MessageContent::Parts(parts) => {
                for part in parts.iter_mut() {
                    if let ContentPart::Text { text } = part {
                        changed |= shrink_text(text);
                    }
                }
            }
        }
    }
    changed
}

fn shrink_text(text: &mut String) -> bool {
    if text.chars().count() <= SHRINK_THRESHOLD_CHARS {
        return false;
    }
    let mut shrunk: String = text.chars().take(SHRINK_KEEP_CHARS).collect();
    shrunk.push_str(TRUNCATION_MARKER);
    *text = shrunk;
    true
}

/// Syntactic variants of a rejected model identifier: strip the `:free`
/// suffix, append it when absent, and strip the organization prefix.
fn repair_variants(model: &str) -> Vec<String> {
    let mut variants = Vec::new();
    if let Some(stripped) = model.strip_suffix(":free") {
        variants.push(stripped.to_string());
    } else {
        variants.push(format!("{}:free", model));
    }
    if let Some((_org, rest)) = model.split_once('/') {
        variants.push(rest.to_string());
    }
    variants.retain(|v| v != model);
    variants.dedup();
    variants
}

/// Unjittered retry delay: base doubling per attempt (1-based)
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// `backoff_delay` plus uniform jitter in `[0, delay/2)`, so the jittered
/// delay stays below twice the unjittered value and successive attempts
/// still strictly increase.
fn jittered_backoff(base: Duration, attempt: u32) -> Duration {
    let delay = backoff_delay(base, attempt);
    let jitter_cap = (delay.as_millis() / 2) as u64;
    if jitter_cap == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..jitter_cap);
    delay + Duration::from_millis(jitter)
}

/// The upstream likes to wrap answers in Markdown code fences; strip them
/// before the answer is cached or returned
fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}
