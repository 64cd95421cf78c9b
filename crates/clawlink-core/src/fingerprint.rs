//! Stable digests and content fingerprints.
//!
//! Idempotency keys, dedupe entries, and replay-safe message ids all need
//! identifiers that are deterministic across process restarts. Everything
//! here is a pure function of its inputs: same text in, same digest out, on
//! any machine, in any run.

use sha2::{Digest, Sha256};

/// Width of the short digest used for idempotency keys and derived ids.
const SHORT_DIGEST_CHARS: usize = 16;

/// Characters of normalized content retained in a fingerprint before the
/// length tag takes over distinguishing long texts.
const FINGERPRINT_PREFIX_CHARS: usize = 256;

/// Full SHA-256 digest, lowercase hex.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Fixed-width digest for keys that appear in headers and database columns.
#[must_use]
pub fn short_digest(input: &str) -> String {
    sha256_hex(input).chars().take(SHORT_DIGEST_CHARS).collect()
}

/// Normalize text into a compact fingerprint.
///
/// Lower-cases, collapses whitespace runs to single spaces, truncates to a
/// fixed prefix, and appends the normalized length, so two long texts that
/// share a prefix but differ in length still fingerprint differently.
#[must_use]
pub fn content_fingerprint(text: &str) -> String {
    let normalized = text
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let total_chars = normalized.chars().count();
    let prefix: String = normalized.chars().take(FINGERPRINT_PREFIX_CHARS).collect();
    format!("{prefix}:{total_chars}")
}

/// Stable message id for transcript replay.
///
/// When the transport assigned an id, hash that; otherwise derive from the
/// message's position and content so reprocessing the same transcript
/// regenerates the same id.
#[must_use]
pub fn stable_message_id(
    raw_id: Option<&str>,
    session_key: &str,
    role: &str,
    index: usize,
    content: &str,
) -> String {
    let seed = match raw_id.filter(|id| !id.is_empty()) {
        Some(id) => format!("raw:{id}"),
        None => format!(
            "gen:{session_key}:{role}:{index}:{}",
            content_fingerprint(content)
        ),
    };
    short_digest(&seed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
