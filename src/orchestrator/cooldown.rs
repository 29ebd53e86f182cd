//! Cooldown Registry
//!
//! Per-model circuit breaker. A throttled model is benched until its
//! `available_at` timestamp passes; repeated throttling on the same model
//! widens the bench exponentially, capped so a model is never lost for good.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::warn;

/// Per-model "available again at" registry
pub struct CooldownRegistry {
    cooldowns: HashMap<String, Instant>,
    base: Duration,
    max: Duration,
}

impl CooldownRegistry {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            cooldowns: HashMap::new(),
            base,
            max,
        }
    }

    /// A model is eligible iff it has no entry or the entry has expired
    pub fn is_available(&self, model: &str) -> bool {
        self.is_available_at(model, Instant::now())
    }

    fn is_available_at(&self, model: &str, now: Instant) -> bool {
        self.cooldowns
            .get(model)
            .is_none_or(|available_at| now >= *available_at)
    }

    /// Bench a model after a throttled attempt. Delay grows 3x per attempt
    /// number, capped at `max`.
    pub fn apply(&mut self, model: &str, attempt: u32) {
        self.apply_at(model, attempt, Instant::now());
    }

    fn apply_at(&mut self, model: &str, attempt: u32, now: Instant) {
        let factor = 3u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self
            .base
            .checked_mul(factor)
            .map(|d| d.min(self.max))
            .unwrap_or(self.max);

        warn!(
            model,
            attempt,
            cooldown_secs = delay.as_secs(),
            "model throttled, applying cooldown"
        );
        self.cooldowns.insert(model.to_string(), now + delay);

        // Opportunistic cleanup so the map does not accumulate dead entries
        self.cooldowns.retain(|_, available_at| now < *available_at);
    }

    pub fn available_at(&self, model: &str) -> Option<Instant> {
        self.cooldowns.get(model).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CooldownRegistry {
        CooldownRegistry::new(Duration::from_secs(10), Duration::from_secs(300))
    }

    #[test]
    fn test_unknown_model_is_available() {
        assert!(registry().is_available("m1"));
    }

    #[test]
    fn test_cooldown_blocks_until_expiry() {
        let mut reg = registry();
        let now = Instant::now();
        reg.apply_at("m1", 1, now);
        assert!(!reg.is_available_at("m1", now));
        assert!(!reg.is_available_at("m1", now + Duration::from_secs(9)));
        assert!(reg.is_available_at("m1", now + Duration::from_secs(10)));
        assert!(reg.is_available_at("m2", now), "other models are unaffected");
    }

    #[test]
    fn test_delays_grow_and_stay_capped() {
        let mut reg = registry();
        let now = Instant::now();

        let mut previous = now;
        for attempt in 1..=3 {
            reg.apply_at("m1", attempt, now);
            let available_at = reg.available_at("m1").unwrap();
            assert!(
                available_at > previous,
                "attempt {} must extend the cooldown",
                attempt
            );
            assert!(available_at <= now + Duration::from_secs(300));
            previous = available_at;
        }
        // 10s, 30s, 90s
        assert_eq!(reg.available_at("m1").unwrap(), now + Duration::from_secs(90));
    }

    #[test]
    fn test_cap_applies_to_large_attempts() {
        let mut reg = registry();
        let now = Instant::now();
        reg.apply_at("m1", 10, now);
        assert_eq!(reg.available_at("m1").unwrap(), now + Duration::from_secs(300));
    }
}
