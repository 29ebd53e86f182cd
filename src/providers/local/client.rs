//! Local generator using the Candle ML framework
//!
//! Runs a quantized GGUF model for degraded answers when the cloud chain is
//! exhausted. Supports CUDA (NVIDIA), Metal (Apple), and CPU fallback.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use candle_core::quantized::gguf_file::Content;
use candle_core::Device;
use candle_transformers::models::quantized_llama::ModelWeights;
use tokenizers::Tokenizer;

use crate::error::ModelError;

/// Generator lifecycle. `Failed` is terminal for the process: a model that
/// failed to load once is never retried, so a broken or missing GGUF costs
/// exactly one load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// Loaded model and tokenizer
struct LoadedModel {
    weights: ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
}

/// Local GGUF generator with lazy, failure-memoized initialization
pub struct LocalGenerator {
    state: Mutex<GeneratorState>,
    model: Arc<Mutex<Option<LoadedModel>>>,
    model_path: PathBuf,
    max_tokens: usize,
}

impl LocalGenerator {
    pub fn new(model_path: PathBuf, max_tokens: usize) -> Self {
        Self {
            state: Mutex::new(GeneratorState::Unloaded),
            model: Arc::new(Mutex::new(None)),
            model_path,
            max_tokens,
        }
    }

    pub fn state(&self) -> GeneratorState {
        *self.state.lock()
    }

    /// Generate an answer with the local model. Errors here are recoverable
    /// for the caller: the degraded generator falls back to its heuristic.
    pub async fn try_generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ModelError> {
        self.ensure_loaded().await?;

        let prompt = Self::format_prompt(system_prompt, user_prompt);
        let model = Arc::clone(&self.model);
        let max_tokens = self.max_tokens;

        tokio::task::spawn_blocking(move || {
            let mut guard = model.lock();
            match guard.as_mut() {
                Some(loaded) => Self::generate_sync(loaded, &prompt, max_tokens, 0.7),
                None => Err(ModelError::not_loaded()),
            }
        })
        .await
        .map_err(|e| ModelError::inference_failed(format!("generation task failed: {}", e)))?
    }

    /// Load the model if this is the first use. Concurrent callers that catch
    /// the load in progress bail out instead of queueing behind it.
    async fn ensure_loaded(&self) -> Result<(), ModelError> {
        {
            let mut state = self.state.lock();
            match *state {
                GeneratorState::Ready => return Ok(()),
                GeneratorState::Failed => {
                    return Err(ModelError::load_failed(
                        "local model previously failed to load",
                    ));
                }
                GeneratorState::Loading => {
                    return Err(ModelError::unavailable("local model is still loading"));
                }
                GeneratorState::Unloaded => *state = GeneratorState::Loading,
            }
        }

        let path = self.model_path.clone();
        let result = tokio::task::spawn_blocking(move || Self::load_model_sync(&path))
            .await
            .map_err(|e| ModelError::load_failed(format!("load task failed: {}", e)))
            .and_then(|r| r);

        match result {
            Ok(loaded) => {
                *self.model.lock() = Some(loaded);
                *self.state.lock() = GeneratorState::Ready;
                info!(path = %self.model_path.display(), "local model loaded");
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = GeneratorState::Failed;
                warn!(
                    path = %self.model_path.display(),
                    error = %e,
                    "local model failed to load, degraded answers will use the heuristic"
                );
                Err(e)
            }
        }
    }

    /// Pick the best available device
    fn device() -> candle_core::Result<Device> {
        #[cfg(feature = "cuda")]
        {
            if candle_core::utils::cuda_is_available() {
                return Device::new_cuda(0);
            }
        }

        #[cfg(all(feature = "metal", target_os = "macos"))]
        {
            if candle_core::utils::metal_is_available() {
                return Device::new_metal(0);
            }
        }

        Ok(Device::Cpu)
    }

    /// Synchronous model loading
    fn load_model_sync(model_path: &Path) -> Result<LoadedModel, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::load_failed(format!(
                "model file not found: {}",
                model_path.display()
            )));
        }

        let device = Self::device()
            .map_err(|e| ModelError::load_failed(format!("failed to get device: {}", e)))?;

        let file = File::open(model_path)
            .map_err(|e| ModelError::load_failed(format!("failed to open model file: {}", e)))?;
        let mut reader = BufReader::new(file);

        let content = Content::read(&mut reader)
            .map_err(|e| ModelError::load_failed(format!("failed to read GGUF content: {}", e)))?;

        let weights = ModelWeights::from_gguf(content, &mut reader, &device)
            .map_err(|e| ModelError::load_failed(format!("failed to load model weights: {}", e)))?;

        // Tokenizer lives next to the model file
        let tokenizer_path = model_path
            .parent()
            .map(|p| p.join("tokenizer.json"))
            .filter(|p| p.exists())
            .ok_or_else(|| {
                ModelError::load_failed("no tokenizer.json found next to model file")
            })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| ModelError::load_failed(format!("failed to load tokenizer: {}", e)))?;

        Ok(LoadedModel { weights, tokenizer, device })
    }

    /// Format prompts into the ChatML template the quantized models expect
    fn format_prompt(system_prompt: &str, user_prompt: &str) -> String {
        format!(
            "<|im_start|>system\n{}\n<|im_end|>\n<|im_start|>user\n{}\n<|im_end|>\n<|im_start|>assistant\n",
            system_prompt.trim(),
            user_prompt.trim()
        )
    }

    /// Generate text (blocking)
    fn generate_sync(
        model: &mut LoadedModel,
        prompt: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, ModelError> {
        use candle_core::Tensor;
        use rand::SeedableRng;

        let encoding = model
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| ModelError::inference_failed(format!("tokenization failed: {}", e)))?;

        // Clamp the prompt to the tail that fits the context window
        let input_ids = encoding.get_ids();
        let start = input_ids.len().saturating_sub(2048);
        let mut tokens: Vec<u32> = input_ids[start..].to_vec();
        if tokens.is_empty() {
            return Err(ModelError::inference_failed("empty prompt after tokenization"));
        }

        let eos_token_id = model
            .tokenizer
            .token_to_id("<|im_end|>")
            .or_else(|| model.tokenizer.token_to_id("</s>"))
            .unwrap_or(2);

        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let mut generated_text = String::new();

        for index in 0..max_tokens {
            // Full prompt on the first pass, then one token at a time against
            // the KV cache
            let (context, index_pos) = if index == 0 {
                (&tokens[..], 0)
            } else {
                (&tokens[tokens.len() - 1..], tokens.len() - 1)
            };

            let input = Tensor::new(context, &model.device)
                .map_err(|e| ModelError::inference_failed(format!("failed to create tensor: {}", e)))?
                .unsqueeze(0)
                .map_err(|e| ModelError::inference_failed(format!("failed to unsqueeze: {}", e)))?;

            let logits = model
                .weights
                .forward(&input, index_pos)
                .map_err(|e| ModelError::inference_failed(format!("forward pass failed: {}", e)))?;
            let logits = logits
                .squeeze(0)
                .map_err(|e| ModelError::inference_failed(format!("squeeze failed: {}", e)))?;

            let next_token = Self::sample(&logits, temperature, &mut rng)?;

            if next_token == eos_token_id {
                break;
            }

            tokens.push(next_token);

            if let Ok(text) = model.tokenizer.decode(&[next_token], false) {
                generated_text.push_str(&text);
            }
        }

        Ok(generated_text)
    }

    /// Sample the next token from last-position logits
    fn sample(
        logits: &candle_core::Tensor,
        temperature: f32,
        rng: &mut rand::rngs::StdRng,
    ) -> Result<u32, ModelError> {
        if temperature <= 0.0 {
            // Greedy
            return logits
                .argmax(0)
                .and_then(|t| t.to_scalar::<u32>())
                .map_err(|e| ModelError::inference_failed(format!("argmax failed: {}", e)));
        }

        let scaled = (logits / temperature as f64)
            .map_err(|e| ModelError::inference_failed(format!("scaling failed: {}", e)))?;
        let probs = candle_nn::ops::softmax(&scaled, 0)
            .map_err(|e| ModelError::inference_failed(format!("softmax failed: {}", e)))?;
        let probs_vec: Vec<f32> = probs
            .to_vec1()
            .map_err(|e| ModelError::inference_failed(format!("to_vec failed: {}", e)))?;

        use rand::distributions::{Distribution, WeightedIndex};
        let dist = WeightedIndex::new(&probs_vec)
            .map_err(|e| ModelError::inference_failed(format!("weighted index failed: {}", e)))?;
        Ok(dist.sample(rng) as u32)
    }
}
