//! Sliding-window duplicate suppression.
//!
//! Hook runtimes deliver the same message more than once in ordinary
//! operation: an echo hook follows the authoritative one, a transport retry
//! resends, a transcript replay repeats history. The window remembers
//! recently seen keys and answers one question: was this key seen within the
//! TTL. Entries expire after [`DEDUPE_TTL`], and the window never holds more
//! than [`DEDUPE_MAX_ENTRIES`] keys, oldest evicted first.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// How long a seen key suppresses duplicates.
pub const DEDUPE_TTL: Duration = Duration::from_secs(30);

/// Hard cap on remembered keys.
pub const DEDUPE_MAX_ENTRIES: usize = 200;

/// A TTL-bounded, size-capped set of recently seen keys.
#[derive(Debug)]
pub struct DedupeWindow {
    ttl: Duration,
    max_entries: usize,
    seen: HashMap<String, Instant>,
    order: VecDeque<String>,
}

impl Default for DedupeWindow {
    fn default() -> Self {
        Self::new(DEDUPE_TTL, DEDUPE_MAX_ENTRIES)
    }
}

impl DedupeWindow {
    /// A window with explicit TTL and capacity.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `key` unless it is already fresh in the window.
    ///
    /// Returns `true` when the key was recorded (first sighting, or the
    /// previous sighting expired) and `false` when a fresh duplicate exists.
    /// A duplicate hit does not refresh the TTL; the first sighting governs.
    pub fn insert_if_fresh(&mut self, key: &str) -> bool {
        self.insert_if_fresh_at(key, Instant::now())
    }

    fn insert_if_fresh_at(&mut self, key: &str, now: Instant) -> bool {
        self.evict_expired(now);
        // Post-sweep, a key still present is necessarily fresh: insertion
        // order matches timestamp order, so expired keys sit at the front
        // and the sweep removed them.
        if self.seen.contains_key(key) {
            return false;
        }
        let _ = self.seen.insert(key.to_owned(), now);
        self.order.push_back(key.to_owned());
        while self.seen.len() > self.max_entries {
            match self.order.pop_front() {
                Some(oldest) => {
                    let _ = self.seen.remove(&oldest);
                }
                None => break,
            }
        }
        true
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(front) = self.order.front() {
            let expired = self
                .seen
                .get(front)
                .is_none_or(|at| now.duration_since(*at) >= self.ttl);
            if !expired {
                break;
            }
            if let Some(key) = self.order.pop_front() {
                let _ = self.seen.remove(&key);
            }
        }
    }

    /// Keys currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the window holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
