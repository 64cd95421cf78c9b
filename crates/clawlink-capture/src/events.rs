//! Hook event wire types.
//!
//! Events arrive from the host runtime as JSON objects tagged with a
//! `hookType` discriminator. Every field beyond the tag is optional on the
//! wire: runtimes differ in what they attach, and a capture layer that
//! rejects a hook over a missing field would lose the event entirely. The
//! deserialized shape is therefore defaulted throughout, and each handler
//! decides what it can do with what actually arrived.

use serde::{Deserialize, Serialize};

use clawlink_core::KeySource;

/// Hook-context fields common to every event.
///
/// The session-key material is flattened alongside the identifiers, so a
/// wire object like `{"sessionKey": "...", "agentId": "..."}` maps directly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventContext {
    /// Session-key material carried in the hook context.
    #[serde(flatten)]
    pub key: KeySource,
    /// Acting agent id, when the runtime distinguishes agents.
    pub agent_id: Option<String>,
    /// Originating board request id, when the runtime propagates one.
    pub request_id: Option<String>,
    /// Host run id, correlating the tool-call hooks of one run.
    pub run_id: Option<String>,
}

/// One transcript entry delivered with `agentEnd`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptMessage {
    /// `user`, `assistant`, or a runtime-specific role.
    pub role: String,
    /// Raw message text.
    pub content: String,
    /// Transport message id, when the runtime kept one.
    pub id: Option<String>,
    /// RFC 3339 timestamp, when the runtime kept one.
    pub timestamp: Option<String>,
}

impl TranscriptMessage {
    /// Whether this entry is a user turn.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role.eq_ignore_ascii_case("user")
    }
}

fn default_true() -> bool {
    true
}

/// A hook event emitted by the host runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "hookType", rename_all = "camelCase")]
pub enum HookEvent {
    /// An inbound user message was observed.
    #[serde(rename_all = "camelCase")]
    MessageReceived {
        /// Transport metadata.
        #[serde(default)]
        meta: KeySource,
        /// Hook context.
        #[serde(default)]
        ctx: EventContext,
        /// Raw message text.
        #[serde(default)]
        content: String,
        /// Transport message id.
        #[serde(default)]
        message_id: Option<String>,
        /// RFC 3339 event timestamp.
        #[serde(default)]
        timestamp: Option<String>,
    },

    /// An assistant reply is about to be delivered. The authoritative
    /// outbound capture path.
    #[serde(rename_all = "camelCase")]
    MessageSending {
        /// Transport metadata.
        #[serde(default)]
        meta: KeySource,
        /// Hook context.
        #[serde(default)]
        ctx: EventContext,
        /// Raw message text.
        #[serde(default)]
        content: String,
        /// Transport message id.
        #[serde(default)]
        message_id: Option<String>,
        /// RFC 3339 event timestamp.
        #[serde(default)]
        timestamp: Option<String>,
    },

    /// An assistant reply was delivered. Echo of `messageSending`.
    #[serde(rename_all = "camelCase")]
    MessageSent {
        /// Transport metadata.
        #[serde(default)]
        meta: KeySource,
        /// Hook context.
        #[serde(default)]
        ctx: EventContext,
        /// Raw message text.
        #[serde(default)]
        content: String,
        /// Transport message id.
        #[serde(default)]
        message_id: Option<String>,
        /// RFC 3339 event timestamp.
        #[serde(default)]
        timestamp: Option<String>,
    },

    /// A tool is about to run.
    #[serde(rename_all = "camelCase")]
    BeforeToolCall {
        /// Transport metadata.
        #[serde(default)]
        meta: KeySource,
        /// Hook context.
        #[serde(default)]
        ctx: EventContext,
        /// Tool name.
        #[serde(default)]
        tool_name: String,
        /// Call parameters as supplied by the runtime.
        #[serde(default)]
        params: serde_json::Value,
        /// RFC 3339 event timestamp.
        #[serde(default)]
        timestamp: Option<String>,
    },

    /// A tool finished running.
    #[serde(rename_all = "camelCase")]
    AfterToolCall {
        /// Transport metadata.
        #[serde(default)]
        meta: KeySource,
        /// Hook context.
        #[serde(default)]
        ctx: EventContext,
        /// Tool name.
        #[serde(default)]
        tool_name: String,
        /// Call parameters, echoed by the runtime.
        #[serde(default)]
        params: serde_json::Value,
        /// Tool result value.
        #[serde(default)]
        result: serde_json::Value,
        /// Wall-clock duration, when the runtime measured it.
        #[serde(default)]
        duration_ms: Option<u64>,
        /// RFC 3339 event timestamp.
        #[serde(default)]
        timestamp: Option<String>,
    },

    /// An agent run is about to start. A read hook: the response may carry
    /// a context block for injection.
    #[serde(rename_all = "camelCase")]
    BeforeAgentStart {
        /// Transport metadata.
        #[serde(default)]
        meta: KeySource,
        /// Hook context.
        #[serde(default)]
        ctx: EventContext,
        /// The prompt the run will start from.
        #[serde(default)]
        prompt: String,
        /// RFC 3339 event timestamp.
        #[serde(default)]
        timestamp: Option<String>,
    },

    /// An agent run finished. Carries the transcript for fallback capture.
    #[serde(rename_all = "camelCase")]
    AgentEnd {
        /// Transport metadata.
        #[serde(default)]
        meta: KeySource,
        /// Hook context.
        #[serde(default)]
        ctx: EventContext,
        /// Transcript messages, possibly the full history resent each turn.
        #[serde(default)]
        messages: Vec<TranscriptMessage>,
        /// Whether the run completed without error.
        #[serde(default = "default_true")]
        success: bool,
        /// Failure description, when the run failed.
        #[serde(default)]
        error: Option<String>,
        /// RFC 3339 event timestamp.
        #[serde(default)]
        timestamp: Option<String>,
    },
}

impl HookEvent {
    /// The wire name of this hook.
    #[must_use]
    pub fn hook_name(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "messageReceived",
            Self::MessageSending { .. } => "messageSending",
            Self::MessageSent { .. } => "messageSent",
            Self::BeforeToolCall { .. } => "beforeToolCall",
            Self::AfterToolCall { .. } => "afterToolCall",
            Self::BeforeAgentStart { .. } => "beforeAgentStart",
            Self::AgentEnd { .. } => "agentEnd",
        }
    }

    /// Transport metadata, common to every variant.
    #[must_use]
    pub fn meta(&self) -> &KeySource {
        match self {
            Self::MessageReceived { meta, .. }
            | Self::MessageSending { meta, .. }
            | Self::MessageSent { meta, .. }
            | Self::BeforeToolCall { meta, .. }
            | Self::AfterToolCall { meta, .. }
            | Self::BeforeAgentStart { meta, .. }
            | Self::AgentEnd { meta, .. } => meta,
        }
    }

    /// Hook context, common to every variant.
    #[must_use]
    pub fn ctx(&self) -> &EventContext {
        match self {
            Self::MessageReceived { ctx, .. }
            | Self::MessageSending { ctx, .. }
            | Self::MessageSent { ctx, .. }
            | Self::BeforeToolCall { ctx, .. }
            | Self::AfterToolCall { ctx, .. }
            | Self::BeforeAgentStart { ctx, .. }
            | Self::AgentEnd { ctx, .. } => ctx,
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hook_name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
