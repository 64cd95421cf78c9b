//! In-memory capture state.
//!
//! Inbound anchors, spawn scope links, pending spawn correlations, replay
//! cursors, and the dedupe windows all live here, behind a single mutex
//! owned by the capture agent. Nothing is persisted: a restart forgets all
//! of it, and the stable-id and idempotency machinery downstream absorbs
//! the resulting replays. Every map is size-capped on insert, so a runtime
//! that floods hooks cannot grow the process without bound.

use std::collections::HashMap;

use clawlink_core::SessionKey;

use crate::dedupe::DedupeWindow;

/// Freshness horizon for inbound anchors and channel activity, in ms.
pub const ANCHOR_FRESH_MS: i64 = 120_000;

/// How long a pending spawn correlation stays matchable, in ms.
pub const PENDING_SPAWN_TTL_MS: i64 = 300_000;

const ANCHORS_MAX: usize = 256;
const SCOPE_LINKS_MAX: usize = 512;
const PENDING_SPAWNS_MAX: usize = 128;
const CURSORS_MAX: usize = 1024;

/// Provenance left behind by an inbound user message, keyed by the raw
/// context session key it arrived under.
#[derive(Clone, Debug)]
pub struct InboundAnchor {
    /// Unix-ms arrival time.
    pub at_ms: i64,
    /// Transport channel id, when known.
    pub channel_id: Option<String>,
    /// Session key the message resolved to.
    pub session_key: SessionKey,
}

/// Board scope a spawned child session inherits from its parent.
#[derive(Clone, Debug)]
pub struct ScopeLink {
    /// Inherited topic.
    pub topic_id: Option<String>,
    /// Inherited task.
    pub task_id: Option<String>,
    /// Originating board request.
    pub request_id: Option<String>,
    /// Session key of the parent that spawned the child.
    pub source_session_key: SessionKey,
    /// Unix-ms recording time.
    pub created_at_ms: i64,
}

/// Parent scope recorded at `beforeToolCall`, awaiting the matching result.
#[derive(Clone, Debug)]
pub struct PendingSpawn {
    /// Parent session key.
    pub session_key: SessionKey,
    /// Parent topic scope.
    pub topic_id: Option<String>,
    /// Parent task scope.
    pub task_id: Option<String>,
    /// Parent request id.
    pub request_id: Option<String>,
    /// Unix-ms recording time.
    pub created_at_ms: i64,
}

/// Most recent inbound activity on one channel.
#[derive(Clone, Debug)]
pub struct ChannelActivity {
    /// Unix-ms arrival time of the latest message.
    pub at_ms: i64,
    /// Session key that message resolved to.
    pub session_key: SessionKey,
}

/// Mutable capture-layer state.
#[derive(Debug, Default)]
pub(crate) struct CaptureState {
    /// Recently seen inbound transport message ids.
    pub inbound_window: DedupeWindow,
    /// Recently seen outbound transport message ids.
    pub outbound_window: DedupeWindow,
    /// Inbound anchors, keyed by raw context session key.
    pub anchors: HashMap<String, InboundAnchor>,
    /// Spawn scope links, keyed by child session key.
    pub scope_links: HashMap<String, ScopeLink>,
    /// Pending spawn correlations, keyed by run id or tool fingerprint.
    pub pending_spawns: HashMap<String, PendingSpawn>,
    /// Transcript messages already scanned, per session key.
    pub replay_cursors: HashMap<String, usize>,
    /// Auto-provisioned topic ids, per session key.
    pub ensured_topics: HashMap<String, String>,
    /// Latest inbound activity, keyed by channel id.
    pub channel_activity: HashMap<String, ChannelActivity>,
}

impl CaptureState {
    pub fn record_anchor(&mut self, raw_key: String, anchor: InboundAnchor) {
        if self.anchors.len() >= ANCHORS_MAX && !self.anchors.contains_key(&raw_key) {
            evict_oldest(&mut self.anchors, |a| a.at_ms);
        }
        let _ = self.anchors.insert(raw_key, anchor);
    }

    /// The anchor for `raw_key`, if one was recorded within the freshness
    /// horizon.
    pub fn fresh_anchor(&self, raw_key: &str, now_ms: i64) -> Option<&InboundAnchor> {
        self.anchors
            .get(raw_key)
            .filter(|anchor| now_ms - anchor.at_ms < ANCHOR_FRESH_MS)
    }

    pub fn record_channel_activity(&mut self, channel_id: String, activity: ChannelActivity) {
        let _ = self.channel_activity.insert(channel_id, activity);
    }

    /// Channel activity recorded within the freshness horizon.
    pub fn fresh_channel_activity(&self, channel_id: &str, now_ms: i64) -> Option<&ChannelActivity> {
        self.channel_activity
            .get(channel_id)
            .filter(|activity| now_ms - activity.at_ms < ANCHOR_FRESH_MS)
    }

    pub fn record_scope_link(&mut self, child_key: String, link: ScopeLink) {
        if self.scope_links.len() >= SCOPE_LINKS_MAX && !self.scope_links.contains_key(&child_key) {
            evict_oldest(&mut self.scope_links, |l| l.created_at_ms);
        }
        let _ = self.scope_links.insert(child_key, link);
    }

    pub fn record_pending_spawn(&mut self, correlation: String, pending: PendingSpawn) {
        if self.pending_spawns.len() >= PENDING_SPAWNS_MAX
            && !self.pending_spawns.contains_key(&correlation)
        {
            evict_oldest(&mut self.pending_spawns, |p| p.created_at_ms);
        }
        let _ = self.pending_spawns.insert(correlation, pending);
    }

    /// A pending spawn recorded within its TTL.
    pub fn pending_spawn(&self, correlation: &str, now_ms: i64) -> Option<&PendingSpawn> {
        self.pending_spawns
            .get(correlation)
            .filter(|pending| now_ms - pending.created_at_ms < PENDING_SPAWN_TTL_MS)
    }

    pub fn set_cursor(&mut self, session_key: String, scanned: usize) {
        if self.replay_cursors.len() >= CURSORS_MAX && !self.replay_cursors.contains_key(&session_key)
        {
            // Cursors carry no timestamp; dropping an arbitrary one only
            // costs a bounded fallback-window rescan with stable ids.
            let victim = self.replay_cursors.keys().next().cloned();
            if let Some(victim) = victim {
                let _ = self.replay_cursors.remove(&victim);
            }
        }
        let _ = self.replay_cursors.insert(session_key, scanned);
    }

    pub fn record_ensured_topic(&mut self, session_key: String, topic_id: String) {
        let _ = self.ensured_topics.insert(session_key, topic_id);
    }
}

fn evict_oldest<V>(map: &mut HashMap<String, V>, at_ms: impl Fn(&V) -> i64) {
    let oldest = map
        .iter()
        .min_by_key(|(_, value)| at_ms(value))
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        let _ = map.remove(&key);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
