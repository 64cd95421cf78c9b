//! Content sanitization for captured text.
//!
//! Raw hook text arrives wearing transport clothing: injected context blocks,
//! provider brackets, timestamps, message-id annotations. Everything
//! downstream (summaries, fingerprints, persistence) sees only the sanitized
//! form, so these transforms run first and are deterministic, pure, and
//! total. The strip order is load-bearing: context blocks are removed before
//! any leading-prefix rule so a block at the start of a message cannot shield
//! a transport prefix behind it.

use regex::Regex;
use std::sync::LazyLock;

use crate::constants::{CONTEXT_BLOCK_BEGIN, CONTEXT_BLOCK_END};

/// Preamble sentence the continuity hook prepends when a session resumes.
pub const CONTINUITY_PREAMBLE: &str = "This conversation continues an earlier session.";

/// Injected context blocks, including the sentinels themselves.
static CONTEXT_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "(?s){}.*?{}",
        regex::escape(CONTEXT_BLOCK_BEGIN),
        regex::escape(CONTEXT_BLOCK_END)
    ))
    .unwrap()
});

/// One or more leading `summary:` labels.
static SUMMARY_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:summary:\s*)+").unwrap());

/// Transport providers recognized in leading brackets.
const PROVIDER_NAMES: &str =
    "discord|slack|telegram|signal|whatsapp|imessage|teams|matrix|sms|email|webchat";

/// A leading provider bracket such as `[Discord Ava]`.
static PROVIDER_BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^\s*\[(?:{PROVIDER_NAMES})\b[^\]\n]*\]\s*")).unwrap()
});

/// The provider token alone, for callers that need to know which one.
static PROVIDER_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)^\s*\[({PROVIDER_NAMES})\b")).unwrap());

/// Embedded message-id annotations, wherever they appear.
static MESSAGE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(?:message[_\s-]?id|msg[_\s-]?id)\s*[:=]\s*[^\]]{0,80}\]").unwrap()
});

/// Leading local-time transport prefixes, `[local time ...]` or `[2:33 PM]`.
static LOCAL_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*\[(?:local time[^\]]{0,40}|\d{1,2}:\d{2}(?::\d{2})?\s*(?:am|pm)?)\]\s*")
        .unwrap()
});

/// Three or more consecutive newlines.
static NEWLINE_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip transport envelopes and injected context from raw message text.
///
/// Plain conversational text round-trips unchanged. The transforms, in
/// order: context blocks, the continuity preamble, leading `summary:`
/// labels, a leading provider bracket, message-id annotations, a leading
/// local-time prefix, newline-run collapsing, and a final trim.
#[must_use]
pub fn sanitize_message_content(text: &str) -> String {
    let text = CONTEXT_BLOCK_RE.replace_all(text, "");
    let text = text.replace(CONTINUITY_PREAMBLE, "");
    let text = SUMMARY_LABEL_RE.replace(&text, "");
    let text = PROVIDER_BRACKET_RE.replace(&text, "");
    let text = MESSAGE_ID_RE.replace_all(&text, "");
    let text = LOCAL_TIME_RE.replace(&text, "");
    let text = NEWLINE_RUN_RE.replace_all(&text, "\n\n");
    text.trim().to_owned()
}

/// Extract the provider token from a leading transport bracket, lowercased.
///
/// `"[Discord Ava] hey"` yields `Some("discord")`; text that does not open
/// with a recognized provider bracket yields `None`.
#[must_use]
pub fn leading_provider_signature(text: &str) -> Option<String> {
    PROVIDER_NAME_RE
        .captures(text)
        .map(|caps| caps[1].to_lowercase())
}

/// Markers that identify classifier output on their own.
const PRIMARY_MARKERS: &[&str] = &["\"candidateTopics\"", "\"routeDecision\"", "\"classifierNotes\""];

/// Markers that identify classifier output only in combination.
const SECONDARY_MARKERS: &[&str] = &["\"window\"", "\"signals\"", "\"confidence\"", "\"verdict\""];

/// Heuristically detect structured classifier/control payloads.
///
/// Such payloads must never be persisted as conversational content. A text
/// qualifies when it opens like structured data (`{` or a code fence) and
/// contains at least one primary marker, or at least two distinct secondary
/// markers.
#[must_use]
pub fn is_classifier_payload_text(text: &str) -> bool {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with("```")) {
        return false;
    }
    if PRIMARY_MARKERS.iter().any(|m| trimmed.contains(m)) {
        return true;
    }
    SECONDARY_MARKERS.iter().filter(|m| trimmed.contains(*m)).count() >= 2
}

/// Derive a one-line summary: the first non-empty line, capped at
/// `max_chars` characters with an ellipsis when truncated.
#[must_use]
pub fn derive_summary(text: &str, max_chars: usize) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if line.chars().count() <= max_chars {
        return line.to_owned();
    }
    let mut out: String = line.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
