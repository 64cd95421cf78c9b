//! Deterministic idempotency keys for log payloads.
//!
//! The key doubles as the durable-queue primary key and the
//! `X-Idempotency-Key` wire header, so it must be stable across process
//! restarts for the same logical event. Payloads that arrive with a key
//! already set (queue replays) keep it untouched.

use clawlink_board::types::LogPayload;
use clawlink_core::{content_fingerprint, short_digest};

/// Ensure `payload.idempotency_key` is set, returning the key.
///
/// When the transport assigned a message id, the key derives from the
/// delivery coordinates alone, so edits to the rendered content do not
/// change it. Without one, the key derives from a normalized content
/// fingerprint plus the payload's routing fields and timestamp.
pub fn ensure_idempotency_key(payload: &mut LogPayload) -> String {
    if let Some(existing) = payload
        .idempotency_key
        .as_ref()
        .filter(|key| !key.is_empty())
    {
        return existing.clone();
    }

    let key = short_digest(&key_seed(payload));
    payload.idempotency_key = Some(key.clone());
    key
}

/// Build the pre-hash seed for a payload without a key.
fn key_seed(payload: &LogPayload) -> String {
    let channel = payload.source.channel.as_deref().unwrap_or("");
    let session_key = payload.source.session_key.as_deref().unwrap_or("");
    let agent_id = payload.agent_id.as_str();
    let kind = payload.kind;

    match payload
        .source
        .message_id
        .as_deref()
        .filter(|id| !id.is_empty())
    {
        Some(message_id) => {
            format!("msg|{channel}|{session_key}|{message_id}|{agent_id}|{kind}")
        }
        None => {
            let related = payload
                .related_log_id
                .map(|id| id.to_string())
                .unwrap_or_default();
            format!(
                "content|{}|{session_key}|{channel}|{agent_id}|{kind}|{related}|{}",
                content_fingerprint(&payload.content),
                payload.created_at
            )
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
