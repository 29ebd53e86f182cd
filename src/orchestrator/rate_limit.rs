//! Rate Limiter
//!
//! Sliding-window admission control over outbound calls. Advisory
//! self-throttling: staying under the local cap keeps the upstream from
//! handing out real bans.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling window length
const WINDOW: Duration = Duration::from_secs(60);

/// Sliding 60s window of outbound call timestamps
pub struct RateLimiter {
    window: VecDeque<Instant>,
    max_per_minute: usize,
}

impl RateLimiter {
    pub fn new(max_per_minute: usize) -> Self {
        Self {
            window: VecDeque::new(),
            max_per_minute,
        }
    }

    /// Admit one physical outbound call. Evaluated once per call, not once
    /// per logical request: retries, fallbacks, and repair probes each
    /// consume a slot.
    pub fn admit(&mut self) -> bool {
        self.admit_at(Instant::now())
    }

    fn admit_at(&mut self, now: Instant) -> bool {
        // Lazy prune of timestamps that slid out of the window
        if let Some(cutoff) = now.checked_sub(WINDOW) {
            while self.window.front().is_some_and(|t| *t <= cutoff) {
                self.window.pop_front();
            }
        }

        if self.window.len() >= self.max_per_minute {
            return false;
        }
        self.window.push_back(now);
        true
    }

    pub fn in_flight_window(&self) -> usize {
        self.window.len()
    }
}
