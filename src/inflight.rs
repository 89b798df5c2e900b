//! Per-key fetch tracking with generation counters.
//!
//! Re-fetches run concurrently, so responses can come back out of order. Each
//! fetch is stamped with a generation from one monotonic counter; a response
//! is applied only if it is still the latest fetch for its key and no newer
//! decision has been applied to the dish it describes.

use std::collections::HashMap;

/// Fetch state of a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching(u64),
}

#[derive(Debug, Default)]
pub struct InFlight {
    last_generation: u64,
    fetching: HashMap<String, u64>,
    fences: HashMap<String, u64>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next generation without starting a fetch.
    pub fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    /// Start a fetch for `key`, superseding any fetch already in flight for it.
    pub fn begin(&mut self, key: &str) -> u64 {
        let generation = self.next_generation();
        self.fetching.insert(key.to_string(), generation);
        generation
    }

    pub fn state(&self, key: &str) -> FetchState {
        match self.fetching.get(key) {
            Some(&generation) => FetchState::Fetching(generation),
            None => FetchState::Idle,
        }
    }

    /// Finish the fetch for `key` stamped `generation`.
    ///
    /// Returns `false` if a newer fetch superseded it or it was cancelled; the
    /// caller must then drop the response.
    pub fn complete(&mut self, key: &str, generation: u64) -> bool {
        match self.fetching.get(key) {
            Some(&current) if current == generation => {
                self.fetching.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Forget any fetch in flight for `key`; its response will be dropped.
    pub fn cancel(&mut self, key: &str) {
        self.fetching.remove(key);
    }

    /// Record that a decision stamped `generation` was applied to dish `id`.
    pub fn fence(&mut self, id: &str, generation: u64) {
        let fence = self.fences.entry(id.to_string()).or_insert(0);
        *fence = (*fence).max(generation);
    }

    /// Whether a decision about dish `id` stamped `generation` may still be applied.
    ///
    /// It may not if a newer decision was already applied, or if a newer fetch
    /// for the same dish is in flight under `dish_key`.
    pub fn is_fresh(&self, id: &str, dish_key: &str, generation: u64) -> bool {
        if self.fences.get(id).is_some_and(|&fence| fence > generation) {
            return false;
        }
        !matches!(self.state(dish_key), FetchState::Fetching(newer) if newer > generation)
    }

    pub fn in_flight(&self) -> usize {
        self.fetching.len()
    }

    pub fn fence_count(&self) -> usize {
        self.fences.len()
    }

    /// Forget every fence once no fetch is in flight.
    ///
    /// Fences only guard responses of fetches still tracked here, so with
    /// none left they can never reject anything. The caller must not hold
    /// completed-but-unapplied responses. Returns whether fences were dropped.
    pub fn release_fences(&mut self) -> bool {
        if !self.fetching.is_empty() || self.fences.is_empty() {
            return false;
        }
        self.fences.clear();
        true
    }
}
