//! Orchestrator Tests
//!
//! Control-loop tests against a scripted backend: fallback ordering, cache
//! behavior, vision isolation, rate-limit stops, and the degraded path.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{AiError, ApiError};
use crate::orchestrator::Orchestrator;
use crate::providers::{
    AttemptOutcome, ChatMessage, CompletionBackend, CompletionRequest, MessageContent,
};

/// One recorded outbound call
#[derive(Clone)]
struct RecordedCall {
    model: String,
    messages: Vec<ChatMessage>,
}

/// Backend that replays scripted outcomes per model and records every call
struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<AttemptOutcome>>>,
    fallback: AttemptOutcome,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    fn new(fallback: AttemptOutcome) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn script(&self, model: &str, outcomes: Vec<AttemptOutcome>) {
        self.scripts.lock().insert(model.to_string(), outcomes.into());
    }

    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    fn models_called(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.model.clone()).collect()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn execute(&self, model: &str, messages: &[ChatMessage]) -> AttemptOutcome {
        self.calls.lock().push(RecordedCall {
            model: model.to_string(),
            messages: messages.to_vec(),
        });
        self.scripts
            .lock()
            .get_mut(model)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn success(text: &str) -> AttemptOutcome {
    AttemptOutcome::Success(text.to_string())
}

fn throttled() -> AttemptOutcome {
    AttemptOutcome::Throttled
}

fn transport() -> AttemptOutcome {
    AttemptOutcome::TransportError(ApiError::network("connection refused"))
}

fn invalid_model() -> AttemptOutcome {
    AttemptOutcome::InvalidModel(ApiError::invalid_model("not a valid model ID"))
}

/// Config tuned for tests: millisecond backoff, no local model
fn test_config(pool: &[&str], fallbacks: &[&str]) -> Config {
    Config {
        primary_models: pool.iter().map(|m| (*m).to_string()).collect(),
        vision_model: "vision-model".into(),
        fallback_models: fallbacks.iter().map(|m| (*m).to_string()).collect(),
        backoff_base: Duration::from_millis(1),
        requests_per_minute: 100,
        cache_size: 10,
        ..Config::default()
    }
}

fn orchestrator(config: Config, backend: Arc<ScriptedBackend>) -> Orchestrator {
    Orchestrator::with_backend(config, backend, None)
}

#[tokio::test]
async fn test_cache_idempotence() {
    let backend = Arc::new(ScriptedBackend::new(success("the answer")));
    let orch = orchestrator(test_config(&["m1"], &["m3"]), backend.clone());

    let request = CompletionRequest::new("sys", "Explain X");
    let first = orch.complete(&request).await.unwrap();
    let second = orch.complete(&request).await.unwrap();

    assert_eq!(first, "the answer");
    assert_eq!(first, second);
    assert_eq!(backend.calls().len(), 1, "second call must be served from cache");
}

#[tokio::test]
async fn test_fallback_ordering() {
    let backend = Arc::new(ScriptedBackend::new(success("from m3")));
    backend.script("m1", vec![throttled(), throttled(), throttled()]);
    backend.script("m2", vec![throttled(), throttled(), throttled()]);
    let orch = orchestrator(test_config(&["m1"], &["m2", "m3"]), backend.clone());

    let answer = orch
        .complete(&CompletionRequest::new("sys", "question"))
        .await
        .unwrap();

    assert_eq!(answer, "from m3");
    assert_eq!(
        backend.models_called(),
        vec!["m1", "m1", "m1", "m2", "m2", "m2", "m3"],
        "each model gets 3 attempts before the chain advances"
    );
}

#[tokio::test]
async fn test_throttled_models_enter_cooldown() {
    let backend = Arc::new(ScriptedBackend::new(success("ok")));
    backend.script("m1", vec![throttled(), throttled(), throttled()]);
    let orch = orchestrator(test_config(&["m1"], &["m3"]), backend.clone());

    orch.complete(&CompletionRequest::new("sys", "question")).await.unwrap();

    assert!(!orch.cooldowns.lock().is_available("m1"));
    assert!(orch.cooldowns.lock().is_available("m3"));
}

#[tokio::test]
async fn test_vision_isolation() {
    let backend = Arc::new(ScriptedBackend::new(success("fallback answer")));
    backend.script("vision-model", vec![throttled(), throttled(), throttled()]);
    let orch = orchestrator(test_config(&["m1"], &["m3"]), backend.clone());

    let request = CompletionRequest::new("sys", "solve the paper").with_image(vec![0u8; 32]);
    orch.complete(&request).await.unwrap();

    let calls = backend.calls();
    assert!(calls.len() > 3, "fallback must have been reached");
    for call in &calls {
        let has_image = call.messages.iter().any(|m| m.content.has_image());
        if call.model == "vision-model" {
            assert!(has_image, "primary vision payload must carry the image");
        } else {
            assert!(!has_image, "fallback payloads must be text-only");
        }
    }
}

#[tokio::test]
async fn test_total_availability_when_everything_is_down() {
    let backend = Arc::new(ScriptedBackend::new(transport()));
    let orch = orchestrator(test_config(&["m1"], &["m2", "m3"]), backend.clone());

    let request = CompletionRequest::new("sys", "1. What is a deadlock?\n2. Define livelock.");
    let answer = orch.complete(&request).await.unwrap();

    assert!(!answer.is_empty());
    assert!(answer.contains("[Degraded answer]"));
    assert!(answer.contains("What is a deadlock?"));
    assert_eq!(backend.calls().len(), 9, "3 models x 3 attempts each");

    // The degraded answer is cached: an identical retry costs nothing
    let again = orch.complete(&request).await.unwrap();
    assert_eq!(answer, again);
    assert_eq!(backend.calls().len(), 9);
}

#[tokio::test]
async fn test_local_rate_limit_is_a_hard_stop() {
    let backend = Arc::new(ScriptedBackend::new(throttled()));
    let mut config = test_config(&["m1"], &["m2", "m3"]);
    config.requests_per_minute = 2;
    let orch = orchestrator(config, backend.clone());

    let result = orch.complete(&CompletionRequest::new("sys", "question")).await;

    assert!(matches!(result, Err(AiError::RateLimited)));
    assert_eq!(
        backend.calls().len(),
        2,
        "the rejected admission must not fall back or degrade"
    );
}

#[tokio::test]
async fn test_round_robin_scenario() {
    let backend = Arc::new(ScriptedBackend::new(transport()));
    backend.script("m1", vec![throttled(), throttled(), throttled()]);
    backend.script("m2", vec![success("answer-2")]);
    backend.script("m3", vec![success("answer-1")]);
    let orch = orchestrator(test_config(&["m1", "m2"], &["m3"]), backend.clone());

    // First call: primary m1 exhausts, m3 serves it
    let first = orch.complete(&CompletionRequest::new("sys", "Explain X")).await.unwrap();
    assert_eq!(first, "answer-1");
    assert!(!orch.cooldowns.lock().is_available("m1"));

    // Second call, same prompt: cursor advanced, primary is m2, and the
    // fingerprint includes the model so this is a cache miss
    let second = orch.complete(&CompletionRequest::new("sys", "Explain X")).await.unwrap();
    assert_eq!(second, "answer-2");

    assert_eq!(backend.models_called(), vec!["m1", "m1", "m1", "m3", "m2"]);
}

#[tokio::test]
async fn test_invalid_model_identifier_repair() {
    let backend = Arc::new(ScriptedBackend::new(transport()));
    backend.script("meta-llama/test-model", vec![invalid_model()]);
    backend.script("meta-llama/test-model:free", vec![success("repaired")]);
    let orch = orchestrator(test_config(&["meta-llama/test-model"], &[]), backend.clone());

    let request = CompletionRequest::new("sys", "question");
    let answer = orch.complete(&request).await.unwrap();
    assert_eq!(answer, "repaired");

    // Cached under the original primary's fingerprint
    let again = orch.complete(&request).await.unwrap();
    assert_eq!(again, "repaired");
    assert_eq!(backend.models_called(), vec!["meta-llama/test-model", "meta-llama/test-model:free"]);
}

#[tokio::test]
async fn test_empty_chain_routes_to_degraded() {
    let backend = Arc::new(ScriptedBackend::new(success("never used")));
    let orch = orchestrator(test_config(&["m1"], &["m3"]), backend.clone());
    orch.cooldowns.lock().apply("m1", 3);
    orch.cooldowns.lock().apply("m3", 3);

    let answer = orch
        .complete(&CompletionRequest::new("sys", "What now?"))
        .await
        .unwrap();

    assert!(answer.contains("[Degraded answer]"));
    assert!(backend.calls().is_empty(), "no outbound calls with an empty chain");
}

#[tokio::test]
async fn test_cancelled_request_degrades_without_calls() {
    let backend = Arc::new(ScriptedBackend::new(success("never used")));
    let orch = orchestrator(test_config(&["m1"], &["m3"]), backend.clone());

    let cancel = AtomicBool::new(true);
    let answer = orch
        .complete_with_cancel(&CompletionRequest::new("sys", "Is anyone there?"), &cancel)
        .await
        .unwrap();

    assert!(answer.contains("[Degraded answer]"));
    assert!(backend.calls().is_empty());
    // Flag untouched by the orchestrator
    assert!(cancel.load(Ordering::Relaxed));
}

#[tokio::test]
async fn test_payload_shrinks_after_first_throttle() {
    let backend = Arc::new(ScriptedBackend::new(transport()));
    backend.script("m1", vec![throttled(), success("ok")]);
    let orch = orchestrator(test_config(&["m1"], &[]), backend.clone());

    let long_prompt = "y".repeat(5000);
    let answer = orch.complete(&CompletionRequest::new("sys", long_prompt)).await.unwrap();
    assert_eq!(answer, "ok");

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);

    let content_len = |call: &RecordedCall| -> usize {
        call.messages
            .iter()
            .map(|m| match &m.content {
                MessageContent::Text(text) => text.chars().count(),
                MessageContent::Parts(_) => 0,
            })
            .sum()
    };
    assert!(content_len(&calls[0]) > 5000);
    assert!(
        content_len(&calls[1]) < 2100,
        "retry after a throttle must carry the shrunk payload"
    );
}

#[tokio::test]
async fn test_rejects_request_with_no_prompt_and_no_image() {
    let backend = Arc::new(ScriptedBackend::new(success("unused")));
    let orch = orchestrator(test_config(&["m1"], &[]), backend.clone());

    let result = orch.complete(&CompletionRequest::new("sys", "   ")).await;
    assert!(matches!(result, Err(AiError::InvalidRequest(_))));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_prefer_local_without_a_model_still_reaches_cloud() {
    let backend = Arc::new(ScriptedBackend::new(success("cloud answer")));
    let mut config = test_config(&["m1"], &[]);
    config.prefer_local = true;
    let orch = orchestrator(config, backend.clone());

    let answer = orch.complete(&CompletionRequest::new("sys", "question")).await.unwrap();
    assert_eq!(answer, "cloud answer");
}

#[tokio::test]
async fn test_model_hint_bypasses_the_pool() {
    let backend = Arc::new(ScriptedBackend::new(success("hinted answer")));
    let orch = orchestrator(test_config(&["m1", "m2"], &[]), backend.clone());

    let request = CompletionRequest::new("sys", "question").with_model_hint("special/model");
    orch.complete(&request).await.unwrap();
    assert_eq!(backend.models_called(), vec!["special/model"]);

    // The pool cursor did not move: the next pool request still starts at m1
    orch.complete(&CompletionRequest::new("sys", "other question")).await.unwrap();
    assert_eq!(backend.models_called()[1], "m1");
}

#[tokio::test]
async fn test_code_fences_are_stripped_before_caching() {
    let backend = Arc::new(ScriptedBackend::new(success("```json\n{\"a\": 1}\n```")));
    let orch = orchestrator(test_config(&["m1"], &[]), backend.clone());

    let answer = orch.complete(&CompletionRequest::new("sys", "give json")).await.unwrap();
    assert_eq!(answer, "{\"a\": 1}");
}
