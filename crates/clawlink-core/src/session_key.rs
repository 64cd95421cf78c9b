//! Canonical session-key resolution.
//!
//! Every hook receives transport metadata and a hook context that may each
//! carry a channel id, a conversation id, a caller-declared session key, and
//! a thread id. [`compute_effective_session_key`] normalizes that mess into
//! one canonical [`SessionKey`] that the capture, delivery, and context
//! layers all agree on. The function is pure and total: no I/O, no panics,
//! and re-deriving a key from the same inputs is idempotent (a thread suffix
//! is never appended twice).
//!
//! Key grammar:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `channel:<id>[\|thread:<id>]` | provider channel, optionally thread-scoped |
//! | `agent:<agentId>:...` | traffic attributed to a named agent |
//! | `clawboard:topic:<topicId>[\|thread:<id>]` | board topic route |
//! | `clawboard:task:<topicId>:<taskId>[\|thread:<id>]` | board task route |
//! | `adhoc:<channel>:<date>` | synthesized fallback (see capture layer) |

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::board_route::BoardRoute;

/// Canonical string identifying a logical conversation thread.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Wrap a raw key value.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The broad `channel:<id>` form for a provider channel.
    #[must_use]
    pub fn for_channel(channel_id: &str) -> Self {
        Self(format!("channel:{channel_id}"))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume self and return the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Parse this key as a board route, if it is one.
    #[must_use]
    pub fn board_route(&self) -> Option<BoardRoute> {
        BoardRoute::parse(&self.0)
    }

    /// Whether this key routes to the board (topic or task scope).
    #[must_use]
    pub fn is_board(&self) -> bool {
        self.board_route().is_some()
    }

    /// Whether the key already carries a `|thread:` qualifier.
    #[must_use]
    pub fn has_thread(&self) -> bool {
        self.0.contains("|thread:")
    }

    /// Append a thread qualifier. Board keys and already-qualified keys are
    /// returned unchanged, which is what makes re-derivation idempotent.
    #[must_use]
    pub fn with_thread(self, thread_id: &str) -> Self {
        if thread_id.is_empty() || self.has_thread() || self.is_board() {
            return self;
        }
        Self(format!("{}|thread:{thread_id}", self.0))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0
    }
}

/// One side of the resolver's input: either transport metadata or the hook
/// context. All fields optional; empty strings are treated as absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeySource {
    /// Provider-level channel id (e.g. `discord`).
    pub channel_id: Option<String>,
    /// Opaque conversation id assigned by the provider or host runtime.
    pub conversation_id: Option<String>,
    /// Caller-declared session key.
    pub session_key: Option<String>,
    /// Thread id, when the provider distinguishes threads.
    pub thread_id: Option<String>,
}

impl KeySource {
    /// Metadata carrying only a session key.
    #[must_use]
    pub fn with_session_key(key: impl Into<String>) -> Self {
        Self {
            session_key: Some(key.into()),
            ..Self::default()
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).map(str::trim).filter(|s| !s.is_empty())
}

/// Resolve the canonical session key for a hook invocation.
///
/// Priority:
///
/// 1. Any explicit board-scoped candidate (context session key, metadata
///    session key, then conversation ids) wins outright. A host runtime may
///    attach an unrelated conversation id to a board-originated turn, so a
///    board key is never displaced by a provider-broad value.
/// 2. Otherwise the first present of: context conversation id, metadata
///    conversation id, context session key, metadata session key.
/// 3. If the chosen base is the bare `channel:<id>` form while a different
///    conversation id is available, the conversation id is more specific and
///    replaces it.
/// 4. With no candidates at all, fall back to `channel:<channelId>`, or
///    `None` when even the channel is unknown.
///
/// A thread id (context preferred over metadata) is appended unless the base
/// is a board key or already thread-qualified.
#[must_use]
pub fn compute_effective_session_key(meta: &KeySource, ctx: &KeySource) -> Option<SessionKey> {
    let candidates = [
        non_empty(ctx.session_key.as_ref()),
        non_empty(meta.session_key.as_ref()),
        non_empty(ctx.conversation_id.as_ref()),
        non_empty(meta.conversation_id.as_ref()),
    ];

    if let Some(board) = candidates
        .iter()
        .flatten()
        .find(|c| BoardRoute::parse(c).is_some())
    {
        return Some(SessionKey::new(*board));
    }

    let channel_id = non_empty(ctx.channel_id.as_ref()).or_else(|| non_empty(meta.channel_id.as_ref()));

    let mut base = non_empty(ctx.conversation_id.as_ref())
        .or_else(|| non_empty(meta.conversation_id.as_ref()))
        .or_else(|| non_empty(ctx.session_key.as_ref()))
        .or_else(|| non_empty(meta.session_key.as_ref()));

    // A bare channel key is the broadest possible scope; a differing
    // conversation id narrows it.
    if let (Some(chosen), Some(chan)) = (base, channel_id) {
        if chosen == format!("channel:{chan}") {
            let narrower = [
                non_empty(ctx.conversation_id.as_ref()),
                non_empty(meta.conversation_id.as_ref()),
            ]
            .into_iter()
            .flatten()
            .find(|c| *c != chosen);
            if let Some(conv) = narrower {
                base = Some(conv);
            }
        }
    }

    let key = match (base, channel_id) {
        (Some(b), _) => SessionKey::new(b),
        (None, Some(chan)) => SessionKey::for_channel(chan),
        (None, None) => return None,
    };

    let thread = non_empty(ctx.thread_id.as_ref()).or_else(|| non_empty(meta.thread_id.as_ref()));
    Some(match thread {
        Some(t) => key.with_thread(t),
        None => key,
    })
}

/// The remainder of an `agent:<id>:...` key, or `None` for other forms.
#[must_use]
pub fn agent_scoped_remainder(key: &str) -> Option<&str> {
    let rest = key.strip_prefix("agent:")?;
    let (_, remainder) = rest.split_once(':')?;
    Some(remainder)
}

/// The `<id>` of an `agent:<id>:...` key, or `None` for other forms.
#[must_use]
pub fn embedded_agent_id(key: &str) -> Option<&str> {
    let rest = key.strip_prefix("agent:")?;
    let (id, _) = rest.split_once(':')?;
    (!id.is_empty()).then_some(id)
}

/// Whether a session key belongs to control-plane or scheduled-job traffic
/// that must bypass all downstream logging.
///
/// Prefixes are matched case-insensitively, either at the start of the key
/// or immediately after an `agent:<id>:` qualifier.
#[must_use]
pub fn should_ignore_session_key(key: &str, prefixes: &[String]) -> bool {
    let lowered = key.to_lowercase();
    let after_agent = agent_scoped_remainder(&lowered);
    prefixes.iter().any(|p| {
        let p = p.to_lowercase();
        if p.is_empty() {
            return false;
        }
        lowered.starts_with(&p) || after_agent.is_some_and(|rest| rest.starts_with(&p))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
