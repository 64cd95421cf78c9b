//! Query normalization and lexical scoring.
//!
//! Pure helpers shared by the engine and the local ranker. Normalization
//! feeds both the remote context API and local scoring, so it must be
//! deterministic and side-effect free.

use std::collections::HashSet;

use clawlink_core::sanitize_message_content;

/// Character cap on normalized query text.
pub const QUERY_MAX_CHARS: usize = 280;

/// Lowercased markers identifying host-runtime heartbeat prompts.
const HEARTBEAT_MARKERS: &[&str] = &["heartbeat.md", "[heartbeat]", "system heartbeat"];

/// Shortest token considered by lexical scoring.
const MIN_TOKEN_CHARS: usize = 2;

/// Turn a raw prompt into query text: sanitize transport artifacts away,
/// collapse whitespace runs, cap the length.
#[must_use]
pub fn normalize_query(prompt: &str) -> String {
    let sanitized = sanitize_message_content(prompt);
    let collapsed = sanitized.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(QUERY_MAX_CHARS).collect()
}

/// Whether a prompt is a heartbeat/control-plane poll rather than user
/// intent. Heartbeats skip retrieval entirely; ranking them would burn the
/// budget on prompts no one reads.
#[must_use]
pub fn is_heartbeat_prompt(prompt: &str) -> bool {
    let lowered = prompt.trim().to_lowercase();
    lowered == "heartbeat" || HEARTBEAT_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Jaccard similarity over word tokens, in `[0, 1]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let tokens_a = tokens(a);
    let tokens_b = tokens(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.len() + tokens_b.len() - intersection;
    intersection as f64 / union as f64
}

/// Lowercased alphanumeric tokens of at least [`MIN_TOKEN_CHARS`] characters.
fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_lowercase)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
