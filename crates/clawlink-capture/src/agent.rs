//! Hook handlers: capture, dedup, and scope resolution.
//!
//! [`CaptureAgent`] turns raw hook events into board log payloads and hands
//! them to the delivery sink. Every handler is failure-tolerant: malformed
//! content, unresolvable sessions, and failed lookups degrade to
//! debug-logged no-ops, never to errors that could break the host runtime's
//! hook chain. Nothing here blocks on the network except the one-shot board
//! scope lookup for otherwise unscoped tool calls.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use clawlink_board::{BoardApi, LogKind, LogPayload, LogQuery, LogSource, TopicUpsert};
use clawlink_core::constants::NO_REPLY_SENTINEL;
use clawlink_core::redact::redact_json;
use clawlink_core::session_key::embedded_agent_id;
use clawlink_core::{
    BoardRoute, KeySource, SessionKey, compute_effective_session_key, derive_summary,
    is_classifier_payload_text, leading_provider_signature, sanitize_message_content,
    short_digest, should_ignore_session_key, stable_message_id,
};
use clawlink_settings::ClawlinkSettings;

use crate::events::{EventContext, HookEvent, TranscriptMessage};
use crate::scope::{ResolvedScope, extract_child_session_key, spawn_correlation_key};
use crate::sink::LogSink;
use crate::state::{CaptureState, ChannelActivity, InboundAnchor, PendingSpawn, ScopeLink};

/// Character cap for derived one-line summaries.
const SUMMARY_MAX_CHARS: usize = 120;

/// Agent ids too generic to serve as a display label.
const GENERIC_AGENT_IDS: &[&str] = &["assistant", "agent", "ai", "bot", "default"];

/// Transcript suffix scanned when no replay cursor exists for a session.
const AGENT_END_FALLBACK_WINDOW: usize = 24;

/// Rows fetched by the one-shot board scope lookup.
const SCOPE_LOOKUP_LIMIT: usize = 5;

/// Turns hook events into board log payloads.
///
/// One instance per process. All mutable state sits behind a single mutex;
/// handlers take it briefly and never across an await point.
pub struct CaptureAgent {
    settings: Arc<ClawlinkSettings>,
    sink: Arc<dyn LogSink>,
    api: Arc<dyn BoardApi>,
    state: Mutex<CaptureState>,
}

impl CaptureAgent {
    /// A capture agent wired to a delivery sink and a board client.
    #[must_use]
    pub fn new(
        settings: Arc<ClawlinkSettings>,
        sink: Arc<dyn LogSink>,
        api: Arc<dyn BoardApi>,
    ) -> Self {
        Self {
            settings,
            sink,
            api,
            state: Mutex::new(CaptureState::default()),
        }
    }

    /// Route one event to its handler.
    ///
    /// `beforeAgentStart` is a read hook served by the context engine; it
    /// falls through to a debug no-op here.
    pub async fn handle(&self, event: HookEvent) {
        if !self.settings.enabled {
            return;
        }
        match event {
            HookEvent::MessageReceived {
                meta,
                ctx,
                content,
                message_id,
                timestamp,
            } => {
                self.message_received(
                    &meta,
                    &ctx,
                    &content,
                    message_id.as_deref(),
                    timestamp.as_deref(),
                );
            }
            HookEvent::MessageSending {
                meta,
                ctx,
                content,
                message_id,
                timestamp,
            } => {
                self.message_sending(
                    &meta,
                    &ctx,
                    &content,
                    message_id.as_deref(),
                    timestamp.as_deref(),
                );
            }
            HookEvent::MessageSent { message_id, .. } => {
                self.message_sent(message_id.as_deref());
            }
            HookEvent::BeforeToolCall {
                meta,
                ctx,
                tool_name,
                params,
                ..
            } => {
                self.before_tool_call(&meta, &ctx, &tool_name, &params).await;
            }
            HookEvent::AfterToolCall {
                meta,
                ctx,
                tool_name,
                params,
                result,
                duration_ms,
                ..
            } => {
                self.after_tool_call(&meta, &ctx, &tool_name, &params, &result, duration_ms)
                    .await;
            }
            HookEvent::AgentEnd {
                meta,
                ctx,
                messages,
                success,
                error,
                ..
            } => {
                self.agent_end(&meta, &ctx, &messages, success, error.as_deref());
            }
            HookEvent::BeforeAgentStart { .. } => {
                debug!("beforeAgentStart is a read hook; capture ignores it");
            }
        }
    }

    // ── message hooks ────────────────────────────────────────────────────

    fn message_received(
        &self,
        meta: &KeySource,
        ctx: &EventContext,
        content: &str,
        message_id: Option<&str>,
        timestamp: Option<&str>,
    ) {
        let sanitized = sanitize_message_content(content);
        if sanitized.is_empty() || is_classifier_payload_text(&sanitized) {
            return;
        }
        let Some(key) = compute_effective_session_key(meta, &ctx.key) else {
            return;
        };
        if should_ignore_session_key(key.as_str(), &self.settings.ignored_session_prefixes) {
            return;
        }
        let channel = channel_of(meta, ctx);
        let now = now_ms();
        {
            let mut state = self.state.lock();
            // Anchors and channel activity are recorded even for
            // board-routed turns: agent_end infers provenance from them.
            if let Some(raw) = non_empty(ctx.key.session_key.as_deref()) {
                state.record_anchor(
                    raw.to_owned(),
                    InboundAnchor {
                        at_ms: now,
                        channel_id: channel.clone(),
                        session_key: key.clone(),
                    },
                );
            }
            if let Some(channel_id) = channel.as_deref() {
                state.record_channel_activity(
                    channel_id.to_owned(),
                    ChannelActivity {
                        at_ms: now,
                        session_key: key.clone(),
                    },
                );
            }
            if key.is_board() {
                // The board service persisted its own user turn already;
                // logging it here would double-count.
                return;
            }
            if let Some(mid) = non_empty(message_id) {
                if !state.inbound_window.insert_if_fresh(&format!("in:{mid}")) {
                    debug!(message_id = mid, "duplicate inbound message suppressed");
                    return;
                }
            }
        }
        let scope = self.resolve_scope(&key, ctx, channel.as_deref());
        let summary = derive_summary(&sanitized, SUMMARY_MAX_CHARS);
        self.sink.submit(LogPayload {
            kind: LogKind::Conversation,
            agent_id: "user".to_owned(),
            agent_label: "User".to_owned(),
            content: sanitized,
            summary,
            raw: None,
            topic_id: scope.topic_id.clone(),
            task_id: scope.task_id.clone(),
            related_log_id: None,
            created_at: created_at_or_now(timestamp),
            idempotency_key: None,
            source: source_for(&key, &scope, message_id, channel),
        });
    }

    fn message_sending(
        &self,
        meta: &KeySource,
        ctx: &EventContext,
        content: &str,
        message_id: Option<&str>,
        timestamp: Option<&str>,
    ) {
        let sanitized = sanitize_message_content(content);
        if sanitized.is_empty() || is_classifier_payload_text(&sanitized) {
            return;
        }
        let Some(key) = compute_effective_session_key(meta, &ctx.key) else {
            return;
        };
        if should_ignore_session_key(key.as_str(), &self.settings.ignored_session_prefixes) {
            return;
        }
        if let Some(mid) = non_empty(message_id) {
            let mut state = self.state.lock();
            if !state.outbound_window.insert_if_fresh(&format!("out:{mid}")) {
                debug!(message_id = mid, "duplicate outbound message suppressed");
                return;
            }
        }
        let channel = channel_of(meta, ctx);
        let scope = self.resolve_scope(&key, ctx, channel.as_deref());
        let summary = derive_summary(&sanitized, SUMMARY_MAX_CHARS);
        self.sink.submit(LogPayload {
            kind: LogKind::Conversation,
            agent_id: "assistant".to_owned(),
            agent_label: self.resolve_agent_label(ctx, &key),
            content: sanitized,
            summary,
            raw: None,
            topic_id: scope.topic_id.clone(),
            task_id: scope.task_id.clone(),
            related_log_id: None,
            created_at: created_at_or_now(timestamp),
            idempotency_key: None,
            source: source_for(&key, &scope, message_id, channel),
        });
    }

    /// Echo notification. Marks the outbound window so later duplicates of
    /// the same transport message id stay suppressed; never enqueues.
    fn message_sent(&self, message_id: Option<&str>) {
        if let Some(mid) = non_empty(message_id) {
            let mut state = self.state.lock();
            if state.outbound_window.insert_if_fresh(&format!("out:{mid}")) {
                debug!(message_id = mid, "echo for a message id the send path never saw");
            }
        }
    }

    // ── tool hooks ───────────────────────────────────────────────────────

    async fn before_tool_call(
        &self,
        meta: &KeySource,
        ctx: &EventContext,
        tool_name: &str,
        params: &Value,
    ) {
        let correlation = spawn_correlation_key(ctx.run_id.as_deref(), tool_name, params);
        let Some((key, scope)) = self.resolve_tool_scope(meta, ctx, &correlation).await else {
            debug!(tool = tool_name, "skipping unanchored tool call");
            return;
        };
        {
            // The matching result, and any child the tool spawns, correlate
            // back through this entry when they carry no key of their own.
            let mut state = self.state.lock();
            state.record_pending_spawn(
                correlation,
                PendingSpawn {
                    session_key: key.clone(),
                    topic_id: scope.topic_id.clone(),
                    task_id: scope.task_id.clone(),
                    request_id: scope.request_id.clone(),
                    created_at_ms: now_ms(),
                },
            );
        }
        let redacted = redact_json(params);
        let channel = channel_of(meta, ctx);
        self.sink.submit(LogPayload {
            kind: LogKind::Action,
            agent_id: "assistant".to_owned(),
            agent_label: self.resolve_agent_label(ctx, &key),
            content: format!("Tool call: {tool_name}\n{redacted}"),
            summary: format!("Tool call: {tool_name}"),
            raw: Some(redacted),
            topic_id: scope.topic_id.clone(),
            task_id: scope.task_id.clone(),
            related_log_id: None,
            created_at: now_rfc3339(),
            idempotency_key: None,
            source: source_for(&key, &scope, None, channel),
        });
    }

    async fn after_tool_call(
        &self,
        meta: &KeySource,
        ctx: &EventContext,
        tool_name: &str,
        params: &Value,
        result: &Value,
        duration_ms: Option<u64>,
    ) {
        let correlation = spawn_correlation_key(ctx.run_id.as_deref(), tool_name, params);
        let Some((key, scope)) = self.resolve_tool_scope(meta, ctx, &correlation).await else {
            debug!(tool = tool_name, "skipping unanchored tool result");
            return;
        };
        // A spawn result that names a child session links that child to the
        // scope resolved here; the child's own events then inherit it.
        if let Some(child) = extract_child_session_key(result) {
            if child.as_str() != key.as_str() {
                let mut state = self.state.lock();
                state.record_scope_link(
                    child.clone(),
                    ScopeLink {
                        topic_id: scope.topic_id.clone(),
                        task_id: scope.task_id.clone(),
                        request_id: scope.request_id.clone(),
                        source_session_key: key.clone(),
                        created_at_ms: now_ms(),
                    },
                );
                debug!(child_key = child.as_str(), "recorded spawn scope link");
            }
        }
        let redacted = redact_json(result);
        let content = match duration_ms {
            Some(ms) => format!("Tool result: {tool_name} ({ms} ms)\n{redacted}"),
            None => format!("Tool result: {tool_name}\n{redacted}"),
        };
        let channel = channel_of(meta, ctx);
        self.sink.submit(LogPayload {
            kind: LogKind::Action,
            agent_id: "assistant".to_owned(),
            agent_label: self.resolve_agent_label(ctx, &key),
            content,
            summary: format!("Tool result: {tool_name}"),
            raw: Some(redacted),
            topic_id: scope.topic_id.clone(),
            task_id: scope.task_id.clone(),
            related_log_id: None,
            created_at: now_rfc3339(),
            idempotency_key: None,
            source: source_for(&key, &scope, None, channel),
        });
    }

    /// Session key and scope for a tool event.
    ///
    /// A recorded spawn link for the event's own session key wins outright,
    /// even over an ambient conversation id pointing at an unrelated board
    /// session. Then the full candidate set resolves a key; a still
    /// unscoped, conversation-derived key gets one board lookup. Events
    /// with no key material fall back to a pending spawn correlation.
    /// Returns `None` for ignored sessions and unanchored control-plane
    /// traffic.
    async fn resolve_tool_scope(
        &self,
        meta: &KeySource,
        ctx: &EventContext,
        correlation: &str,
    ) -> Option<(SessionKey, ResolvedScope)> {
        if let Some(raw) = non_empty(ctx.key.session_key.as_deref()) {
            let link = self.state.lock().scope_links.get(raw).cloned();
            if let Some(link) = link {
                if should_ignore_session_key(raw, &self.settings.ignored_session_prefixes) {
                    return None;
                }
                return Some((
                    SessionKey::new(raw),
                    ResolvedScope {
                        topic_id: link.topic_id,
                        task_id: link.task_id,
                        request_id: ctx.request_id.clone().or(link.request_id),
                        inherited: true,
                    },
                ));
            }
        }

        if let Some(key) = compute_effective_session_key(meta, &ctx.key) {
            if should_ignore_session_key(key.as_str(), &self.settings.ignored_session_prefixes) {
                return None;
            }
            let channel = channel_of(meta, ctx);
            let mut scope = self.resolve_scope(&key, ctx, channel.as_deref());
            let conversation_derived = non_empty(ctx.key.session_key.as_deref()).is_none()
                && non_empty(meta.session_key.as_deref()).is_none()
                && (non_empty(ctx.key.conversation_id.as_deref()).is_some()
                    || non_empty(meta.conversation_id.as_deref()).is_some());
            if scope.is_unscoped() && !key.is_board() && conversation_derived {
                if let Some(recovered) = self.lookup_scope_remote(&key).await {
                    scope = recovered;
                }
            }
            if scope.is_unscoped() && self.looks_unanchored(meta, ctx) {
                return None;
            }
            return Some((key, scope));
        }

        let pending = {
            let state = self.state.lock();
            state.pending_spawn(correlation, now_ms()).cloned()
        };
        pending.map(|p| {
            (
                p.session_key,
                ResolvedScope {
                    topic_id: p.topic_id,
                    task_id: p.task_id,
                    request_id: p.request_id,
                    inherited: true,
                },
            )
        })
    }

    /// Whether a tool event has no tie to any observed conversation: no
    /// channel, no conversation id, and no fresh inbound anchor for its raw
    /// session key. Such traffic is internal control-plane activity.
    fn looks_unanchored(&self, meta: &KeySource, ctx: &EventContext) -> bool {
        if non_empty(meta.channel_id.as_deref()).is_some()
            || non_empty(ctx.key.channel_id.as_deref()).is_some()
            || non_empty(meta.conversation_id.as_deref()).is_some()
            || non_empty(ctx.key.conversation_id.as_deref()).is_some()
        {
            return false;
        }
        let raw = non_empty(ctx.key.session_key.as_deref())
            .or_else(|| non_empty(meta.session_key.as_deref()));
        let Some(raw) = raw else {
            return true;
        };
        self.state.lock().fresh_anchor(raw, now_ms()).is_none()
    }

    /// One-shot board lookup: recent logs under this key may carry the
    /// originating request id and board scope. A hit is cached as a scope
    /// link, so later events resolve locally.
    async fn lookup_scope_remote(&self, key: &SessionKey) -> Option<ResolvedScope> {
        let query = LogQuery {
            session_key: Some(key.as_str().to_owned()),
            limit: Some(SCOPE_LOOKUP_LIMIT),
            ..LogQuery::default()
        };
        let rows = match self.api.get_logs(&query).await {
            Ok(rows) => rows,
            Err(err) => {
                debug!(error = %err, "board scope lookup failed");
                return None;
            }
        };
        let scope = rows.iter().find_map(|row| {
            let source = row.source.as_ref();
            let request_id = source.and_then(|s| s.request_id.clone());
            let topic_id = row
                .topic_id
                .clone()
                .or_else(|| source.and_then(|s| s.board_scope_topic_id.clone()));
            let task_id = row
                .task_id
                .clone()
                .or_else(|| source.and_then(|s| s.board_scope_task_id.clone()));
            if request_id.is_none() && topic_id.is_none() && task_id.is_none() {
                return None;
            }
            Some(ResolvedScope {
                topic_id,
                task_id,
                request_id,
                inherited: true,
            })
        })?;
        let mut state = self.state.lock();
        state.record_scope_link(
            key.as_str().to_owned(),
            ScopeLink {
                topic_id: scope.topic_id.clone(),
                task_id: scope.task_id.clone(),
                request_id: scope.request_id.clone(),
                source_session_key: key.clone(),
                created_at_ms: now_ms(),
            },
        );
        Some(scope)
    }

    // ── run hooks ────────────────────────────────────────────────────────

    fn agent_end(
        &self,
        meta: &KeySource,
        ctx: &EventContext,
        messages: &[TranscriptMessage],
        success: bool,
        error: Option<&str>,
    ) {
        let now = now_ms();
        let (key, channel) = self.infer_end_session(meta, ctx, messages, now);
        if should_ignore_session_key(key.as_str(), &self.settings.ignored_session_prefixes) {
            return;
        }
        let start = {
            let state = self.state.lock();
            match state.replay_cursors.get(key.as_str()).copied() {
                Some(seen) => seen.min(messages.len()),
                None => messages.len().saturating_sub(AGENT_END_FALLBACK_WINDOW),
            }
        };
        let scope = self.resolve_scope(&key, ctx, channel.as_deref());
        for (index, message) in messages.iter().enumerate().skip(start) {
            if let Some(payload) =
                self.transcript_payload(&key, ctx, &scope, channel.as_deref(), index, message)
            {
                self.sink.submit(payload);
            }
        }
        {
            let mut state = self.state.lock();
            state.set_cursor(key.as_str().to_owned(), messages.len());
        }
        if !success || self.debug_capture() {
            self.sink
                .submit(self.terminal_payload(&key, ctx, &scope, channel, success, error));
        }
    }

    fn transcript_payload(
        &self,
        key: &SessionKey,
        ctx: &EventContext,
        scope: &ResolvedScope,
        channel: Option<&str>,
        index: usize,
        message: &TranscriptMessage,
    ) -> Option<LogPayload> {
        let is_user = message.is_user();
        // Board sessions and channel sessions have their user turns captured
        // by the board service and message_received respectively.
        if is_user && (key.is_board() || key.as_str().starts_with("channel:")) {
            return None;
        }
        if message.content.trim() == NO_REPLY_SENTINEL {
            return None;
        }
        let sanitized = sanitize_message_content(&message.content);
        if sanitized.is_empty()
            || sanitized == NO_REPLY_SENTINEL
            || is_classifier_payload_text(&sanitized)
        {
            return None;
        }
        let role = if is_user { "user" } else { "assistant" };
        let stable_id = stable_message_id(
            message.id.as_deref(),
            key.as_str(),
            role,
            index,
            &message.content,
        );
        if let Some(raw_id) = non_empty(message.id.as_deref()) {
            let mut state = self.state.lock();
            let window = if is_user {
                &mut state.inbound_window
            } else {
                &mut state.outbound_window
            };
            let prefix = if is_user { "in" } else { "out" };
            if !window.insert_if_fresh(&format!("{prefix}:{raw_id}")) {
                // Captured by the granular hooks moments ago.
                return None;
            }
        }
        let (agent_id, agent_label) = if is_user {
            ("user".to_owned(), "User".to_owned())
        } else {
            ("assistant".to_owned(), self.resolve_agent_label(ctx, key))
        };
        let summary = derive_summary(&sanitized, SUMMARY_MAX_CHARS);
        Some(LogPayload {
            kind: LogKind::Conversation,
            agent_id,
            agent_label,
            content: sanitized,
            summary,
            raw: None,
            topic_id: scope.topic_id.clone(),
            task_id: scope.task_id.clone(),
            related_log_id: None,
            created_at: created_at_or_now(message.timestamp.as_deref()),
            idempotency_key: None,
            source: source_for(key, scope, Some(&stable_id), channel.map(ToOwned::to_owned)),
        })
    }

    fn terminal_payload(
        &self,
        key: &SessionKey,
        ctx: &EventContext,
        scope: &ResolvedScope,
        channel: Option<String>,
        success: bool,
        error: Option<&str>,
    ) -> LogPayload {
        let content = if success {
            "Run complete".to_owned()
        } else {
            match error {
                Some(err) => format!("Run failed: {err}"),
                None => "Run failed".to_owned(),
            }
        };
        let summary = if success { "Run complete" } else { "Run failed" }.to_owned();
        LogPayload {
            kind: LogKind::Action,
            agent_id: "assistant".to_owned(),
            agent_label: self.resolve_agent_label(ctx, key),
            content,
            summary,
            raw: None,
            topic_id: scope.topic_id.clone(),
            task_id: scope.task_id.clone(),
            related_log_id: None,
            created_at: now_rfc3339(),
            idempotency_key: None,
            source: source_for(key, scope, None, channel),
        }
    }

    /// Infer the session an `agentEnd` transcript belongs to.
    ///
    /// A board-route context key is trusted as-is. Failing that, a fresh
    /// inbound anchor for the raw context key names the session this run
    /// answered. Failing that, a provider signature in the latest user
    /// message paired with fresh activity on that channel. Failing
    /// everything, an ad-hoc daily key.
    fn infer_end_session(
        &self,
        meta: &KeySource,
        ctx: &EventContext,
        messages: &[TranscriptMessage],
        now: i64,
    ) -> (SessionKey, Option<String>) {
        let raw = non_empty(ctx.key.session_key.as_deref())
            .or_else(|| non_empty(meta.session_key.as_deref()));
        if let Some(raw) = raw {
            if BoardRoute::parse(raw).is_some() {
                return (SessionKey::new(raw), channel_of(meta, ctx));
            }
            let state = self.state.lock();
            if let Some(anchor) = state.fresh_anchor(raw, now) {
                return (anchor.session_key.clone(), anchor.channel_id.clone());
            }
        }
        let signature = messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .and_then(|m| leading_provider_signature(&m.content));
        if let Some(provider) = signature.as_deref() {
            let state = self.state.lock();
            if let Some(activity) = state.fresh_channel_activity(provider, now) {
                return (activity.session_key.clone(), Some(provider.to_owned()));
            }
        }
        let channel = channel_of(meta, ctx).or(signature);
        let date = Utc::now().format("%Y-%m-%d");
        let key = SessionKey::new(format!(
            "adhoc:{}:{date}",
            channel.as_deref().unwrap_or("unknown")
        ));
        (key, channel)
    }

    // ── scope and labels ─────────────────────────────────────────────────

    /// The board scope a payload carries.
    ///
    /// Order: the key's own board route; a recorded spawn link for the key;
    /// the configured default scope; per-session topic auto-provisioning.
    fn resolve_scope(
        &self,
        key: &SessionKey,
        ctx: &EventContext,
        channel: Option<&str>,
    ) -> ResolvedScope {
        if let Some(route) = key.board_route() {
            return ResolvedScope {
                topic_id: Some(route.topic_id().as_str().to_owned()),
                task_id: route.task_id().map(|t| t.as_str().to_owned()),
                request_id: ctx.request_id.clone(),
                inherited: false,
            };
        }
        {
            let state = self.state.lock();
            if let Some(link) = state.scope_links.get(key.as_str()) {
                return ResolvedScope {
                    topic_id: link.topic_id.clone(),
                    task_id: link.task_id.clone(),
                    request_id: ctx.request_id.clone().or_else(|| link.request_id.clone()),
                    inherited: true,
                };
            }
        }
        if self.settings.default_topic_id.is_some() || self.settings.default_task_id.is_some() {
            return ResolvedScope {
                topic_id: self.settings.default_topic_id.clone(),
                task_id: self.settings.default_task_id.clone(),
                request_id: ctx.request_id.clone(),
                inherited: false,
            };
        }
        if let Some(topic_id) = self.ensure_topic(key, channel) {
            return ResolvedScope {
                topic_id: Some(topic_id),
                task_id: None,
                request_id: ctx.request_id.clone(),
                inherited: false,
            };
        }
        ResolvedScope {
            request_id: ctx.request_id.clone(),
            ..ResolvedScope::default()
        }
    }

    /// Auto-provision a per-session board topic and return its id.
    ///
    /// The id is derived from the session key, so it is stable across
    /// restarts and usable before the upsert round-trips: the upsert rides
    /// the same ordering chain as the logs that reference it.
    fn ensure_topic(&self, key: &SessionKey, channel: Option<&str>) -> Option<String> {
        if !self.settings.auto_topic_by_session {
            return None;
        }
        let topic_id = {
            let mut state = self.state.lock();
            if let Some(existing) = state.ensured_topics.get(key.as_str()) {
                return Some(existing.clone());
            }
            let topic_id = format!("topic-{}", short_digest(key.as_str()));
            state.record_ensured_topic(key.as_str().to_owned(), topic_id.clone());
            topic_id
        };
        let name = match channel {
            Some(ch) => format!("{ch} sessions"),
            None => key.as_str().to_owned(),
        };
        self.sink.provision_topic(TopicUpsert {
            id: Some(topic_id.clone()),
            name,
            tags: None,
        });
        debug!(topic_id = topic_id.as_str(), "auto-provisioned session topic");
        Some(topic_id)
    }

    /// Display label for assistant-authored logs: an explicit, non-generic
    /// agent id from the hook context, else an `agent:<id>:` prefix
    /// embedded in the session key, else the configured default.
    fn resolve_agent_label(&self, ctx: &EventContext, key: &SessionKey) -> String {
        if let Some(id) = non_empty(ctx.agent_id.as_deref()) {
            if !GENERIC_AGENT_IDS.contains(&id.to_lowercase().as_str()) {
                return id.to_owned();
            }
        }
        if let Some(id) = embedded_agent_id(key.as_str()) {
            return id.to_owned();
        }
        self.settings.agent_label.clone()
    }

    /// Whether verbose capture diagnostics are on.
    fn debug_capture(&self) -> bool {
        matches!(self.settings.logging.level.as_str(), "debug" | "trace")
    }
}

fn source_for(
    key: &SessionKey,
    scope: &ResolvedScope,
    message_id: Option<&str>,
    channel: Option<String>,
) -> LogSource {
    LogSource {
        channel,
        session_key: Some(key.as_str().to_owned()),
        message_id: non_empty(message_id).map(ToOwned::to_owned),
        request_id: scope.request_id.clone(),
        board_scope_topic_id: scope.topic_id.clone(),
        board_scope_task_id: scope.task_id.clone(),
        board_scope_inherited: scope.inherited.then_some(true),
    }
}

fn channel_of(meta: &KeySource, ctx: &EventContext) -> Option<String> {
    non_empty(meta.channel_id.as_deref())
        .or_else(|| non_empty(ctx.key.channel_id.as_deref()))
        .map(ToOwned::to_owned)
}

fn created_at_or_now(timestamp: Option<&str>) -> String {
    non_empty(timestamp).map_or_else(now_rfc3339, ToOwned::to_owned)
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use serde_json::json;

    use clawlink_board::{
        BoardResult, ContextQuery, LogRow, SearchQuery, SearchResponse, Task, Topic,
    };
    use clawlink_settings::LoggingSettings;

    #[derive(Default)]
    struct RecordingSink {
        payloads: Mutex<Vec<LogPayload>>,
        upserts: Mutex<Vec<TopicUpsert>>,
    }

    impl RecordingSink {
        fn payloads(&self) -> Vec<LogPayload> {
            self.payloads.lock().clone()
        }

        fn upserts(&self) -> Vec<TopicUpsert> {
            self.upserts.lock().clone()
        }
    }

    impl LogSink for RecordingSink {
        fn submit(&self, payload: LogPayload) {
            self.payloads.lock().push(payload);
        }

        fn provision_topic(&self, upsert: TopicUpsert) {
            self.upserts.lock().push(upsert);
        }
    }

    #[derive(Default)]
    struct StubBoardApi {
        logs: Vec<LogRow>,
        log_queries: Mutex<Vec<LogQuery>>,
    }

    #[async_trait]
    impl BoardApi for StubBoardApi {
        async fn post_log(&self, _payload: &LogPayload) -> BoardResult<()> {
            Ok(())
        }

        async fn get_logs(&self, query: &LogQuery) -> BoardResult<Vec<LogRow>> {
            self.log_queries.lock().push(query.clone());
            Ok(self.logs.clone())
        }

        async fn get_topics(&self) -> BoardResult<Vec<Topic>> {
            Ok(Vec::new())
        }

        async fn get_tasks(&self, _topic_id: &str) -> BoardResult<Vec<Task>> {
            Ok(Vec::new())
        }

        async fn search(&self, _query: &SearchQuery) -> BoardResult<SearchResponse> {
            Ok(SearchResponse::default())
        }

        async fn get_context(&self, _query: &ContextQuery) -> BoardResult<Option<String>> {
            Ok(None)
        }

        async fn upsert_topic(&self, upsert: &TopicUpsert) -> BoardResult<Topic> {
            Ok(Topic {
                id: upsert.id.clone().unwrap_or_default(),
                name: upsert.name.clone(),
                tags: Vec::new(),
                updated_at: None,
                score: None,
                note_weight: None,
            })
        }
    }

    fn capture_agent(settings: ClawlinkSettings) -> (CaptureAgent, Arc<RecordingSink>) {
        let (agent, sink, _api) = capture_agent_with_api(settings, StubBoardApi::default());
        (agent, sink)
    }

    fn capture_agent_with_api(
        settings: ClawlinkSettings,
        api: StubBoardApi,
    ) -> (CaptureAgent, Arc<RecordingSink>, Arc<StubBoardApi>) {
        let sink = Arc::new(RecordingSink::default());
        let api = Arc::new(api);
        let agent = CaptureAgent::new(Arc::new(settings), sink.clone(), api.clone());
        (agent, sink, api)
    }

    fn discord_meta() -> KeySource {
        KeySource {
            channel_id: Some("discord".to_owned()),
            conversation_id: Some("channel:discord-77".to_owned()),
            ..KeySource::default()
        }
    }

    fn ctx_with_key(session_key: &str) -> EventContext {
        EventContext {
            key: KeySource {
                session_key: Some(session_key.to_owned()),
                ..KeySource::default()
            },
            ..EventContext::default()
        }
    }

    fn received_event(content: &str, message_id: Option<&str>) -> HookEvent {
        HookEvent::MessageReceived {
            meta: discord_meta(),
            ctx: ctx_with_key("run-7"),
            content: content.to_owned(),
            message_id: message_id.map(ToOwned::to_owned),
            timestamp: None,
        }
    }

    fn sending_event(content: &str, message_id: Option<&str>, ctx: EventContext) -> HookEvent {
        HookEvent::MessageSending {
            meta: discord_meta(),
            ctx,
            content: content.to_owned(),
            message_id: message_id.map(ToOwned::to_owned),
            timestamp: None,
        }
    }

    fn before_tool(meta: KeySource, ctx: EventContext, tool: &str, params: Value) -> HookEvent {
        HookEvent::BeforeToolCall {
            meta,
            ctx,
            tool_name: tool.to_owned(),
            params,
            timestamp: None,
        }
    }

    fn after_tool(ctx: EventContext, tool: &str, params: Value, result: Value) -> HookEvent {
        HookEvent::AfterToolCall {
            meta: KeySource::default(),
            ctx,
            tool_name: tool.to_owned(),
            params,
            result,
            duration_ms: Some(12),
            timestamp: None,
        }
    }

    fn end_event(
        ctx: EventContext,
        messages: Vec<TranscriptMessage>,
        success: bool,
        error: Option<&str>,
    ) -> HookEvent {
        HookEvent::AgentEnd {
            meta: KeySource::default(),
            ctx,
            messages,
            success,
            error: error.map(ToOwned::to_owned),
            timestamp: None,
        }
    }

    fn transcript(role: &str, content: &str) -> TranscriptMessage {
        TranscriptMessage {
            role: role.to_owned(),
            content: content.to_owned(),
            id: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn inbound_user_message_becomes_conversation_log() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent.handle(received_event("hello there", Some("m-1"))).await;

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 1);
        let p = &payloads[0];
        assert_matches!(p.kind, LogKind::Conversation);
        assert_eq!(p.agent_id, "user");
        assert_eq!(p.agent_label, "User");
        assert_eq!(p.content, "hello there");
        assert_eq!(p.summary, "hello there");
        assert!(p.topic_id.is_none());
        assert!(p.idempotency_key.is_none());
        assert_eq!(p.source.session_key.as_deref(), Some("channel:discord-77"));
        assert_eq!(p.source.channel.as_deref(), Some("discord"));
        assert_eq!(p.source.message_id.as_deref(), Some("m-1"));
    }

    #[tokio::test]
    async fn empty_and_classifier_content_are_dropped() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent.handle(received_event("   ", None)).await;
        agent
            .handle(received_event(
                "[CLAWBOARD_CONTEXT_BEGIN]injected[CLAWBOARD_CONTEXT_END]",
                None,
            ))
            .await;
        agent
            .handle(received_event(
                r#"{"window":[],"candidateTopics":[]}"#,
                None,
            ))
            .await;

        assert!(sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn board_originated_user_turns_are_not_logged() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent
            .handle(HookEvent::MessageReceived {
                meta: KeySource {
                    channel_id: Some("discord".to_owned()),
                    ..KeySource::default()
                },
                ctx: ctx_with_key("clawboard:topic:topic-infra"),
                content: "work on the rollout".to_owned(),
                message_id: Some("m-9".to_owned()),
                timestamp: None,
            })
            .await;

        assert!(sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn ignored_prefix_sessions_are_dropped() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent
            .handle(HookEvent::MessageReceived {
                meta: KeySource::default(),
                ctx: ctx_with_key("cron:daily-report"),
                content: "scheduled output".to_owned(),
                message_id: None,
                timestamp: None,
            })
            .await;

        assert!(sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn duplicate_transport_message_id_is_suppressed() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent.handle(received_event("hello", Some("m-1"))).await;
        agent.handle(received_event("hello", Some("m-1"))).await;

        assert_eq!(sink.payloads().len(), 1);
    }

    #[tokio::test]
    async fn messages_without_ids_are_not_deduped() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent.handle(received_event("first", None)).await;
        agent.handle(received_event("second", None)).await;

        assert_eq!(sink.payloads().len(), 2);
    }

    #[tokio::test]
    async fn assistant_label_resolution_order() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());

        let mut named = ctx_with_key("run-1");
        named.agent_id = Some("rex".to_owned());
        agent.handle(sending_event("on it", Some("m-1"), named)).await;

        let generic = EventContext {
            key: KeySource {
                session_key: Some("agent:ava:discord-7".to_owned()),
                ..KeySource::default()
            },
            agent_id: Some("assistant".to_owned()),
            ..EventContext::default()
        };
        agent
            .handle(HookEvent::MessageSending {
                meta: KeySource::default(),
                ctx: generic,
                content: "done".to_owned(),
                message_id: Some("m-2".to_owned()),
                timestamp: None,
            })
            .await;

        agent
            .handle(sending_event("fallback", Some("m-3"), EventContext::default()))
            .await;

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[0].agent_label, "rex");
        assert_eq!(payloads[1].agent_label, "ava");
        assert_eq!(payloads[2].agent_label, "Assistant");
        assert!(payloads.iter().all(|p| p.agent_id == "assistant"));
    }

    #[tokio::test]
    async fn message_sent_consults_window_but_never_enqueues() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent
            .handle(sending_event("reply", Some("m-5"), EventContext::default()))
            .await;
        agent
            .handle(HookEvent::MessageSent {
                meta: discord_meta(),
                ctx: EventContext::default(),
                content: "reply".to_owned(),
                message_id: Some("m-5".to_owned()),
                timestamp: None,
            })
            .await;
        // A replay of the authoritative hook stays suppressed too.
        agent
            .handle(sending_event("reply", Some("m-5"), EventContext::default()))
            .await;

        assert_eq!(sink.payloads().len(), 1);
    }

    #[tokio::test]
    async fn tool_call_params_are_redacted() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent
            .handle(before_tool(
                discord_meta(),
                EventContext::default(),
                "http_request",
                json!({"url": "https://api.example.net", "apiToken": "sk-secret-1"}),
            ))
            .await;

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 1);
        let p = &payloads[0];
        assert_matches!(p.kind, LogKind::Action);
        assert_eq!(p.summary, "Tool call: http_request");
        assert!(p.content.contains("[redacted]"));
        assert!(!p.content.contains("sk-secret-1"));
        let raw = p.raw.as_ref().unwrap();
        assert_eq!(raw["apiToken"], "[redacted]");
        assert_eq!(raw["url"], "https://api.example.net");
    }

    #[tokio::test]
    async fn spawn_link_outranks_stale_conversation_id() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());

        let mut parent = ctx_with_key("clawboard:task:topic-a:task-b");
        parent.request_id = Some("req-9".to_owned());
        agent
            .handle(before_tool(
                KeySource::default(),
                parent.clone(),
                "sessions_spawn",
                json!({"task": "audit the deploy"}),
            ))
            .await;
        agent
            .handle(after_tool(
                parent,
                "sessions_spawn",
                json!({"task": "audit the deploy"}),
                json!({"sessionKey": "agent:sub:run-42", "status": "started"}),
            ))
            .await;

        // The child call carries a conversation id pointing at an
        // unrelated board session; the spawn link must win.
        let mut child = ctx_with_key("agent:sub:run-42");
        child.key.conversation_id = Some("clawboard:topic:topic-stale".to_owned());
        agent
            .handle(before_tool(KeySource::default(), child, "bash", json!({"cmd": "ls"})))
            .await;

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 3);
        let p = &payloads[2];
        assert_eq!(p.topic_id.as_deref(), Some("topic-a"));
        assert_eq!(p.task_id.as_deref(), Some("task-b"));
        assert_eq!(p.source.session_key.as_deref(), Some("agent:sub:run-42"));
        assert_eq!(p.source.request_id.as_deref(), Some("req-9"));
        assert_eq!(p.source.board_scope_topic_id.as_deref(), Some("topic-a"));
        assert_eq!(p.source.board_scope_inherited, Some(true));
    }

    #[tokio::test]
    async fn agent_end_resolves_through_fresh_anchor() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent.handle(received_event("hi", Some("m-1"))).await;
        agent
            .handle(end_event(
                ctx_with_key("run-7"),
                vec![transcript("user", "hi"), transcript("assistant", "all done")],
                true,
                None,
            ))
            .await;

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 2);
        let reply = &payloads[1];
        assert_eq!(reply.agent_id, "assistant");
        assert_eq!(reply.content, "all done");
        assert_eq!(reply.source.session_key.as_deref(), Some("channel:discord-77"));
        // The user turn was already captured by message_received.
        assert_eq!(payloads.iter().filter(|p| p.agent_id == "user").count(), 1);
    }

    #[tokio::test]
    async fn agent_end_replay_cursor_skips_scanned_messages() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent
            .handle(end_event(
                EventContext::default(),
                vec![transcript("assistant", "alpha")],
                true,
                None,
            ))
            .await;
        agent
            .handle(end_event(
                EventContext::default(),
                vec![transcript("assistant", "alpha"), transcript("assistant", "beta")],
                true,
                None,
            ))
            .await;

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].content, "alpha");
        assert_eq!(payloads[1].content, "beta");
    }

    #[tokio::test]
    async fn agent_end_without_cursor_scans_fallback_window() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        let messages: Vec<TranscriptMessage> = (0..30)
            .map(|i| transcript("assistant", &format!("reply {i}")))
            .collect();
        agent
            .handle(end_event(EventContext::default(), messages, true, None))
            .await;

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), AGENT_END_FALLBACK_WINDOW);
        assert_eq!(payloads[0].content, "reply 6");
        assert_eq!(payloads.last().unwrap().content, "reply 29");
    }

    #[tokio::test]
    async fn agent_end_skips_no_reply_sentinel() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent
            .handle(end_event(
                EventContext::default(),
                vec![transcript("assistant", NO_REPLY_SENTINEL)],
                true,
                None,
            ))
            .await;

        assert!(sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn failed_run_emits_terminal_action() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent
            .handle(end_event(
                EventContext::default(),
                Vec::new(),
                false,
                Some("tool crashed"),
            ))
            .await;

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 1);
        assert_matches!(payloads[0].kind, LogKind::Action);
        assert_eq!(payloads[0].content, "Run failed: tool crashed");
        assert_eq!(payloads[0].summary, "Run failed");
    }

    #[tokio::test]
    async fn debug_level_emits_run_complete_marker() {
        let settings = ClawlinkSettings {
            logging: LoggingSettings {
                level: "debug".to_owned(),
                ..LoggingSettings::default()
            },
            ..ClawlinkSettings::default()
        };
        let (agent, sink) = capture_agent(settings);
        agent
            .handle(end_event(EventContext::default(), Vec::new(), true, None))
            .await;

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].content, "Run complete");
    }

    #[tokio::test]
    async fn auto_topic_provisioned_once_per_session() {
        let settings = ClawlinkSettings {
            auto_topic_by_session: true,
            ..ClawlinkSettings::default()
        };
        let (agent, sink) = capture_agent(settings);
        agent.handle(received_event("first message", Some("m-1"))).await;
        agent.handle(received_event("second message", Some("m-2"))).await;

        let expected_topic = format!("topic-{}", short_digest("channel:discord-77"));
        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 2);
        assert!(payloads.iter().all(|p| p.topic_id.as_deref() == Some(expected_topic.as_str())));

        let upserts = sink.upserts();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].id.as_deref(), Some(expected_topic.as_str()));
        assert_eq!(upserts[0].name, "discord sessions");
    }

    #[tokio::test]
    async fn default_scope_attaches_to_unscoped_payloads() {
        let settings = ClawlinkSettings {
            default_topic_id: Some("topic-house".to_owned()),
            default_task_id: Some("task-chores".to_owned()),
            ..ClawlinkSettings::default()
        };
        let (agent, sink) = capture_agent(settings);
        agent.handle(received_event("water the plants", None)).await;

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].topic_id.as_deref(), Some("topic-house"));
        assert_eq!(payloads[0].task_id.as_deref(), Some("task-chores"));
        assert!(payloads[0].source.board_scope_inherited.is_none());
    }

    #[tokio::test]
    async fn remote_lookup_recovers_scope_once() {
        let row = LogRow {
            id: 1,
            kind: LogKind::Conversation,
            agent_id: Some("assistant".to_owned()),
            agent_label: None,
            content: "earlier work".to_owned(),
            summary: None,
            topic_id: Some("topic-z".to_owned()),
            task_id: None,
            related_log_id: None,
            created_at: "2026-08-20T12:00:00.000Z".to_owned(),
            score: None,
            note_weight: None,
            source: Some(LogSource {
                request_id: Some("req-55".to_owned()),
                ..LogSource::default()
            }),
        };
        let api = StubBoardApi {
            logs: vec![row],
            log_queries: Mutex::default(),
        };
        let (agent, sink, api) = capture_agent_with_api(ClawlinkSettings::default(), api);

        let meta = KeySource {
            channel_id: Some("discord".to_owned()),
            conversation_id: Some("channel:discord-9".to_owned()),
            ..KeySource::default()
        };
        agent
            .handle(before_tool(meta.clone(), EventContext::default(), "bash", json!({"cmd": "ls"})))
            .await;
        agent
            .handle(before_tool(meta, EventContext::default(), "bash", json!({"cmd": "pwd"})))
            .await;

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 2);
        for p in &payloads {
            assert_eq!(p.topic_id.as_deref(), Some("topic-z"));
            assert_eq!(p.source.request_id.as_deref(), Some("req-55"));
            assert_eq!(p.source.board_scope_inherited, Some(true));
        }
        // The second call resolved from the cached scope link.
        assert_eq!(api.log_queries.lock().len(), 1);
    }

    #[tokio::test]
    async fn unanchored_control_plane_calls_are_skipped() {
        let (agent, sink, api) =
            capture_agent_with_api(ClawlinkSettings::default(), StubBoardApi::default());
        agent
            .handle(before_tool(
                KeySource::default(),
                ctx_with_key("internal-run-1"),
                "heartbeat",
                json!({}),
            ))
            .await;

        assert!(sink.payloads().is_empty());
        assert!(api.log_queries.lock().is_empty());
    }

    #[tokio::test]
    async fn disabled_agent_is_a_no_op() {
        let settings = ClawlinkSettings {
            enabled: false,
            ..ClawlinkSettings::default()
        };
        let (agent, sink) = capture_agent(settings);
        agent.handle(received_event("hello", Some("m-1"))).await;

        assert!(sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn before_agent_start_is_not_captured() {
        let (agent, sink) = capture_agent(ClawlinkSettings::default());
        agent
            .handle(HookEvent::BeforeAgentStart {
                meta: discord_meta(),
                ctx: ctx_with_key("run-7"),
                prompt: "plan the rollout".to_owned(),
                timestamp: None,
            })
            .await;

        assert!(sink.payloads().is_empty());
    }
}
