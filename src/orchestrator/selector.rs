//! Model Selector
//!
//! Chooses the primary model for a request and builds the ordered fallback
//! chain. Text requests spread load round-robin over a configured pool; a
//! request with an image is pinned to the vision model, and images are never
//! offered to fallbacks.

use crate::orchestrator::cooldown::CooldownRegistry;

/// Round-robin pool plus fallback chain builder
pub struct ModelSelector {
    pool: Vec<String>,
    vision_model: String,
    fallbacks: Vec<String>,
    disable_fallbacks: bool,
    cursor: usize,
}

impl ModelSelector {
    pub fn new(
        pool: Vec<String>,
        vision_model: String,
        fallbacks: Vec<String>,
        disable_fallbacks: bool,
    ) -> Self {
        let pool = if pool.is_empty() {
            vec![crate::config::DEFAULT_TEXT_MODEL.to_string()]
        } else {
            pool
        };
        Self {
            pool,
            vision_model,
            fallbacks,
            disable_fallbacks,
            cursor: 0,
        }
    }

    /// Resolve the primary model without advancing the cursor. The cursor
    /// only moves once the orchestrator has confirmed a cache miss, so
    /// cached repeats do not skew the load spread.
    pub fn peek_primary(&self, has_image: bool, hint: Option<&str>) -> String {
        if has_image {
            return self.vision_model.clone();
        }
        if let Some(hint) = hint {
            return hint.to_string();
        }
        self.pool[self.cursor % self.pool.len()].clone()
    }

    /// Commit the round-robin step for a pool-selected primary
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.pool.len();
    }

    /// Primary followed by the configured fallbacks, primary de-duplicated,
    /// models in cooldown removed. An empty result is legal: the caller
    /// routes it straight to the degraded generator.
    pub fn chain_for(&self, primary: &str, cooldowns: &CooldownRegistry) -> Vec<String> {
        let mut chain = vec![primary.to_string()];
        if !self.disable_fallbacks {
            for fallback in &self.fallbacks {
                if fallback != primary {
                    chain.push(fallback.clone());
                }
            }
        }
        chain.retain(|model| cooldowns.is_available(model));
        chain
    }
}
