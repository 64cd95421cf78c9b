//! Backoff configuration and calculation.
//!
//! Two retry regimes share this math: the immediate-send loop (fast, short
//! cap, bounded by a total deadline) and the durable queue's drain schedule
//! (slow, capped in the minutes). The async loops themselves live next to
//! their callers; this module is the portable, sync-only arithmetic.

use serde::{Deserialize, Serialize};

/// Base delay for the immediate-send retry loop.
pub const IMMEDIATE_BASE_DELAY_MS: u64 = 250;
/// Per-attempt delay cap for the immediate-send retry loop.
pub const IMMEDIATE_MAX_DELAY_MS: u64 = 2_500;
/// Base delay for durable-queue redelivery.
pub const DURABLE_BASE_DELAY_MS: u64 = 5_000;
/// Delay cap for durable-queue redelivery (~5 minutes).
pub const DURABLE_MAX_DELAY_MS: u64 = 300_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Parameters for exponential backoff.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    /// Base delay in ms; attempt `n` waits `base * 2^n` before jitter.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap applied after exponentiation, in ms.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0; delays vary ±this fraction.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    IMMEDIATE_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    IMMEDIATE_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::immediate()
    }
}

impl BackoffConfig {
    /// Profile for the immediate-send retry loop: 250ms doubling, 2.5s cap.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: IMMEDIATE_BASE_DELAY_MS,
            max_delay_ms: IMMEDIATE_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    /// Profile for durable-queue redelivery: 5s doubling, 5min cap.
    #[must_use]
    pub fn durable() -> Self {
        Self {
            base_delay_ms: DURABLE_BASE_DELAY_MS,
            max_delay_ms: DURABLE_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    /// Jittered delay for a zero-based attempt index.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.delay_for_attempt_with_random(attempt, rand::random::<f64>())
    }

    /// Delay with explicit randomness in `[0.0, 1.0)`, for deterministic
    /// tests.
    ///
    /// Formula: `min(max_delay, base * 2^attempt) * (1 + (random*2-1) * jitter)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt_with_random(&self, attempt: u32, random: f64) -> u64 {
        let exponential = self.base_delay_ms.saturating_mul(1u64 << attempt.min(31));
        let capped = exponential.min(self.max_delay_ms);
        let jitter = 1.0 + (random * 2.0 - 1.0) * self.jitter_factor;
        ((capped as f64) * jitter).round().max(0.0) as u64
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
