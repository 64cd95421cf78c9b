//! Rendering a [`LocalRanking`] into a plain-text context block.
//!
//! Section order is fixed: intent header, signals, working set, recent
//! thread, topic memory. Empty sections are omitted entirely so small
//! rankings produce small blocks.

use std::collections::HashSet;

use clawlink_board::LogRow;
use clawlink_core::derive_summary;

use crate::ranker::{LocalRanking, RankedTopic};

/// Annotation notes rendered under a single timeline entry.
const NOTES_PER_ENTRY: usize = 2;

/// Annotation notes rendered across the whole timeline.
const NOTES_TOTAL: usize = 4;

/// Character clip applied to timeline lines.
const TIMELINE_CLIP_CHARS: usize = 200;

/// Render a ranking as the block text placed between the context markers.
/// The result is clipped to `max_chars` characters.
#[must_use]
pub fn assemble_block(
    query: &str,
    mode: &str,
    ranking: &LocalRanking,
    max_chars: usize,
    timeline_limit: usize,
) -> String {
    let mut lines =
        vec![format!("User intent: {query}"), format!("Retrieval mode: {mode}")];

    if !ranking.signals.is_empty() {
        lines.push("Signals:".to_owned());
        for signal in &ranking.signals {
            lines.push(format!("- {signal}"));
        }
    }

    if !ranking.topics.is_empty() {
        lines.push("Working set:".to_owned());
        for entry in &ranking.topics {
            lines.push(format!("- Topic: {} ({})", entry.topic.name, entry.topic.id));
            for ranked in &entry.tasks {
                let task = &ranked.task;
                let status =
                    task.status.as_deref().map_or_else(String::new, |s| format!(" [{s}]"));
                lines.push(format!("  - Task: {} ({}){status}", task.title, task.id));
            }
        }
    }

    timeline_section(&mut lines, ranking, timeline_limit);
    memory_section(&mut lines, &ranking.topics);

    hard_truncate(&lines.join("\n"), max_chars)
}

/// Truncate to at most `max_chars` characters. Counts scalar values, so the
/// cut never splits a UTF-8 sequence.
#[must_use]
pub fn hard_truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    clipped.trim_end().to_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal
// ─────────────────────────────────────────────────────────────────────────────

fn timeline_section(lines: &mut Vec<String>, ranking: &LocalRanking, limit: usize) {
    let rows = dedupe_timeline(&ranking.timeline, limit);
    if rows.is_empty() {
        return;
    }
    lines.push("Recent thread:".to_owned());
    let mut notes_used = 0;
    // Rows arrive newest first; display reads oldest to newest.
    for row in rows.iter().rev() {
        lines.push(timeline_line(row));
        for note in
            notes_for(&ranking.notes, row.id).take(NOTES_PER_ENTRY.min(NOTES_TOTAL - notes_used))
        {
            lines.push(format!("  - note: {note}"));
            notes_used += 1;
        }
    }
}

/// Drop repeated author/text pairs, keeping the newest occurrence, and cap
/// the timeline at `limit` rows.
fn dedupe_timeline(rows: &[LogRow], limit: usize) -> Vec<&LogRow> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        if out.len() >= limit {
            break;
        }
        let key = format!("{}|{}", author(row), row_text(row));
        if seen.insert(key) {
            out.push(row);
        }
    }
    out
}

fn notes_for(notes: &[LogRow], log_id: i64) -> impl Iterator<Item = String> + '_ {
    notes.iter().filter(move |note| note.related_log_id == Some(log_id)).map(row_text)
}

fn timeline_line(row: &LogRow) -> String {
    format!("- [{}] {}: {}", short_timestamp(&row.created_at), author(row), row_text(row))
}

fn author(row: &LogRow) -> &str {
    row.agent_label.as_deref().or(row.agent_id.as_deref()).unwrap_or("unknown")
}

/// Clip an RFC 3339 timestamp to minute precision for display;
/// `2026-08-20T12:00:00.000Z` renders as `2026-08-20T12:00`.
fn short_timestamp(created_at: &str) -> &str {
    created_at.get(..16).unwrap_or(created_at)
}

fn row_text(row: &LogRow) -> String {
    derive_summary(row.summary.as_deref().unwrap_or(&row.content), TIMELINE_CLIP_CHARS)
}

fn memory_section(lines: &mut Vec<String>, topics: &[RankedTopic]) {
    if topics.iter().all(|t| t.memory.is_empty()) {
        return;
    }
    lines.push("Topic memory:".to_owned());
    for entry in topics {
        for line in &entry.memory {
            lines.push(format!("- {}: {line}", entry.topic.name));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
