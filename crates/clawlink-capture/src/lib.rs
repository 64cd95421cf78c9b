//! # clawlink-capture
//!
//! Hook event capture: the write half of the agent.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`agent`] | [`CaptureAgent`], the per-hook handlers |
//! | [`events`] | Tagged [`HookEvent`] wire enum and transcript types |
//! | [`dedupe`] | TTL + capacity bounded message-id window |
//! | [`state`] | In-memory anchors, scope links, spawn correlation, cursors |
//! | [`scope`] | Board-scope resolution helpers |
//! | [`sink`] | [`LogSink`] seam between capture and delivery |
//!
//! Capture never fails upward. A hook event that cannot be attributed,
//! deduplicated, or scoped becomes a debug line and a dropped payload,
//! not an error in the host runtime's hook chain.

#![deny(unsafe_code)]

pub mod agent;
pub mod dedupe;
pub mod events;
pub mod scope;
pub mod sink;
pub mod state;

pub use agent::CaptureAgent;
pub use dedupe::{DEDUPE_MAX_ENTRIES, DEDUPE_TTL, DedupeWindow};
pub use events::{EventContext, HookEvent, TranscriptMessage};
pub use scope::{ResolvedScope, extract_child_session_key, spawn_correlation_key};
pub use sink::LogSink;
pub use state::{
    ANCHOR_FRESH_MS, ChannelActivity, InboundAnchor, PENDING_SPAWN_TTL_MS, PendingSpawn, ScopeLink,
};
