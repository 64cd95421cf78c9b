//! # clawlink-core
//!
//! Shared domain types and pure helpers for the Clawlink agent.
//!
//! Everything in this crate is synchronous and side-effect free: session-key
//! resolution, board-route parsing, content sanitization, payload redaction,
//! fingerprinting, and backoff math. The async surfaces (board client,
//! delivery pipeline, capture handlers) live in the crates that build on
//! this one.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`ids`] | Branded identifier types (`MessageId`, `TopicId`, ...) |
//! | [`session_key`] | Effective session-key resolution and ignore rules |
//! | [`board_route`] | `clawboard:*` session-key parsing |
//! | [`sanitize`] | Transport-artifact stripping and classifier detection |
//! | [`redact`] | Secret-key redaction for raw payload snapshots |
//! | [`fingerprint`] | Content fingerprints and stable message ids |
//! | [`retry`] | Exponential backoff configuration |
//! | [`constants`] | Shared marker strings and defaults |

#![deny(unsafe_code)]

pub mod board_route;
pub mod constants;
pub mod fingerprint;
pub mod ids;
pub mod redact;
pub mod retry;
pub mod sanitize;
pub mod session_key;

pub use board_route::BoardRoute;
pub use constants::{CONTEXT_BLOCK_BEGIN, CONTEXT_BLOCK_END, NO_REPLY_SENTINEL};
pub use fingerprint::{content_fingerprint, short_digest, stable_message_id};
pub use ids::{MessageId, QueueEntryId, RequestId, TaskId, TopicId};
pub use retry::BackoffConfig;
pub use sanitize::{
    derive_summary, is_classifier_payload_text, leading_provider_signature,
    sanitize_message_content,
};
pub use session_key::{
    KeySource, SessionKey, compute_effective_session_key, should_ignore_session_key,
};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
