//! Recursive redaction of secret-bearing fields.
//!
//! Tool parameters and results are captured as JSON. Before any of that JSON
//! is serialized into a log payload, every field whose key smells like a
//! credential is replaced with a fixed marker, and oversized strings are
//! clipped so a single tool result cannot bloat the activity log.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Marker substituted for values under secret-like keys.
pub const REDACTED_MARKER: &str = "[redacted]";

/// Marker substituted for subtrees beyond the recursion depth cap.
pub const DEPTH_EXCEEDED_MARKER: &str = "[depth-limit]";

/// Maximum recursion depth before a subtree is replaced wholesale.
const MAX_DEPTH: usize = 8;

/// Maximum characters retained from any single string value.
const MAX_STRING_CHARS: usize = 2_000;

static SECRET_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)token|secret|password|key|auth").unwrap());

/// Whether a field key should have its value redacted.
#[must_use]
pub fn is_secret_key(key: &str) -> bool {
    SECRET_KEY_RE.is_match(key)
}

/// Produce a redacted copy of a JSON value.
///
/// Object fields with secret-like keys become [`REDACTED_MARKER`] regardless
/// of value shape. Other objects and arrays are walked recursively up to a
/// depth cap, beyond which [`DEPTH_EXCEEDED_MARKER`] is substituted. String
/// values are clipped to a fixed character budget.
#[must_use]
pub fn redact_json(value: &Value) -> Value {
    redact_at_depth(value, 0)
}

fn redact_at_depth(value: &Value, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return Value::String(DEPTH_EXCEEDED_MARKER.to_owned());
    }
    match value {
        Value::Object(map) => {
            let redacted = map
                .iter()
                .map(|(key, inner)| {
                    let new_value = if is_secret_key(key) {
                        Value::String(REDACTED_MARKER.to_owned())
                    } else {
                        redact_at_depth(inner, depth + 1)
                    };
                    (key.clone(), new_value)
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_at_depth(item, depth + 1))
                .collect(),
        ),
        Value::String(s) => Value::String(clip_string(s)),
        other => other.clone(),
    }
}

fn clip_string(s: &str) -> String {
    if s.chars().count() <= MAX_STRING_CHARS {
        return s.to_owned();
    }
    let mut clipped: String = s.chars().take(MAX_STRING_CHARS).collect();
    clipped.push_str("…[truncated]");
    clipped
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
