//! Response Cache
//!
//! Content-addressed answer store. Bounded, FIFO eviction: only insertion
//! order matters, a hit does not extend an entry's lifetime.

use std::collections::{HashMap, VecDeque};

use sha2::{Digest, Sha256};

/// Bounded fingerprint -> answer store
pub struct ResponseCache {
    entries: HashMap<String, String>,
    /// Insertion order of the keys in `entries`
    order: VecDeque<String>,
    capacity: usize,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Deterministic digest identifying a cacheable request. The model is
    /// part of the identity: the same prompt may legitimately produce
    /// different acceptable answers from different models.
    pub fn fingerprint(
        model: &str,
        has_image: bool,
        system_prompt: &str,
        user_prompt: &str,
    ) -> String {
        let mut hasher = Sha256::new();
        // Length-delimited so "ab" + "c" and "a" + "bc" cannot collide
        for field in [model, system_prompt, user_prompt] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update([u8::from(has_image)]);
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, fingerprint: &str) -> Option<String> {
        self.entries.get(fingerprint).cloned()
    }

    /// Insert an answer. A fingerprint that is already present is left
    /// untouched (a collision is a hit, not an update); when capacity is
    /// exceeded, the single oldest surviving insertion is evicted.
    pub fn put(&mut self, fingerprint: String, answer: String) {
        if self.entries.contains_key(&fingerprint) {
            return;
        }
        self.order.push_back(fingerprint.clone());
        self.entries.insert(fingerprint, answer);

        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
