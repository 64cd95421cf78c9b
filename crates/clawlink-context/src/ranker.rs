//! Local fallback ranking over raw board rows.
//!
//! When the board's context endpoint yields nothing, the engine fetches
//! topics, session logs, and search hits directly and ranks them here.
//! Scoring blends semantic scores returned by the board, session
//! continuity, and lexical overlap with the query; the result feeds
//! [`crate::block::assemble_block`].

use std::collections::{HashMap, HashSet};

use clawlink_board::{
    BoardApi, LogKind, LogQuery, LogRow, SearchQuery, SearchResponse, Task, Topic,
};
use clawlink_core::derive_summary;
use clawlink_settings::ContextSettings;
use tracing::debug;

use crate::query::jaccard_similarity;

/// Topics scoring at or below this are dropped unless the session touched them.
pub const TOPIC_SCORE_FLOOR: f64 = 0.12;

/// Tasks scoring at or below this only appear as board-order padding.
pub const TASK_SCORE_FLOOR: f64 = 0.05;

/// Cap on the note-weight contribution to a score.
const NOTE_WEIGHT_CAP: f64 = 0.24;

/// Maximum cross-session signal lines surfaced per ranking.
const SIGNAL_LIMIT: usize = 6;

/// Character clip applied to signal and memory lines.
const LINE_CLIP_CHARS: usize = 160;

/// Memory lines retained per topic.
const TOPIC_MEMORY_LINES: usize = 2;

/// A topic retained by the ranker.
#[derive(Clone, Debug)]
pub struct RankedTopic {
    /// The board topic row.
    pub topic: Topic,
    /// Blended relevance score.
    pub score: f64,
    /// Tasks under this topic, ranked then padded in board order.
    pub tasks: Vec<RankedTask>,
    /// Pinned note lines attached to the topic.
    pub memory: Vec<String>,
}

/// A task retained under a ranked topic.
#[derive(Clone, Debug)]
pub struct RankedTask {
    /// The board task row.
    pub task: Task,
    /// Blended relevance score.
    pub score: f64,
}

/// Everything the local ranker produced for one query.
#[derive(Clone, Debug, Default)]
pub struct LocalRanking {
    /// Retained topics, best first.
    pub topics: Vec<RankedTopic>,
    /// Conversation rows for the current session, newest first.
    pub timeline: Vec<LogRow>,
    /// Note rows matched by the search, for timeline annotation.
    pub notes: Vec<LogRow>,
    /// Cross-session log lines relevant to the query.
    pub signals: Vec<String>,
}

impl LocalRanking {
    /// True when nothing worth rendering was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty() && self.timeline.is_empty() && self.signals.is_empty()
    }
}

/// Fetch board rows and rank them locally. Every fetch failure degrades to
/// an empty section; this function never errors.
pub async fn local_rank(
    api: &dyn BoardApi,
    settings: &ContextSettings,
    query: &str,
    session_key: &str,
) -> LocalRanking {
    let logs_query = LogQuery {
        session_key: Some(session_key.to_owned()),
        kind: Some(LogKind::Conversation),
        limit: Some(settings.log_limit),
        ..LogQuery::default()
    };
    let search_query = SearchQuery {
        q: query.to_owned(),
        session_key: Some(session_key.to_owned()),
        include_pending: false,
        limit_topics: Some(settings.topic_limit.saturating_mul(2)),
        limit_tasks: Some(settings.task_limit.saturating_mul(2)),
        limit_logs: Some(settings.log_limit),
    };
    let (topics, session_logs, search) = tokio::join!(
        api.get_topics(),
        api.get_logs(&logs_query),
        api.search(&search_query),
    );
    let topics = topics.unwrap_or_else(|err| {
        debug!(error = %err, "topic listing failed; ranking without board topics");
        Vec::new()
    });
    let session_logs = session_logs.unwrap_or_else(|err| {
        debug!(error = %err, "session log fetch failed; ranking without continuity");
        Vec::new()
    });
    let search = search.unwrap_or_else(|err| {
        debug!(error = %err, "search failed; ranking without semantic scores");
        SearchResponse::default()
    });

    let continuity = continuity_topics(&session_logs);
    let touched = touched_tasks(&session_logs);
    let topic_semantics =
        semantic_index(search.topics.iter().map(|t| (t.id.as_str(), t.score, t.note_weight)));
    let task_semantics =
        semantic_index(search.tasks.iter().map(|t| (t.id.as_str(), t.score, t.note_weight)));

    let retained =
        rank_topics(topics, query, &continuity, &topic_semantics, settings.topic_limit);

    let task_batches =
        futures::future::join_all(retained.iter().map(|(topic, _)| api.get_tasks(&topic.id)))
            .await;

    let mut ranked = Vec::with_capacity(retained.len());
    for ((topic, score), batch) in retained.into_iter().zip(task_batches) {
        let tasks = batch.unwrap_or_else(|err| {
            debug!(topic = %topic.id, error = %err, "task fetch failed; topic listed without tasks");
            Vec::new()
        });
        let tasks = rank_tasks(&tasks, query, &touched, &task_semantics, settings.task_limit);
        let memory = topic_memory(&topic.id, &search.notes);
        ranked.push(RankedTopic { topic, score, tasks, memory });
    }

    let signals = signal_lines(&search.logs, session_key);

    LocalRanking { topics: ranked, timeline: session_logs, notes: search.notes, signals }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal
// ─────────────────────────────────────────────────────────────────────────────

/// Distinct topic ids the session touched, in order of most recent use.
/// Rows arrive newest first, so position doubles as a recency rank.
fn continuity_topics(rows: &[LogRow]) -> Vec<String> {
    let mut seen = Vec::new();
    for row in rows {
        let topic = row
            .topic_id
            .clone()
            .or_else(|| row.source.as_ref().and_then(|s| s.board_scope_topic_id.clone()));
        if let Some(id) = topic {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
    }
    seen
}

/// Task ids the session touched, directly or through an inherited scope.
fn touched_tasks(rows: &[LogRow]) -> HashSet<String> {
    rows.iter()
        .filter_map(|row| {
            row.task_id
                .clone()
                .or_else(|| row.source.as_ref().and_then(|s| s.board_scope_task_id.clone()))
        })
        .collect()
}

/// Index of `(score, note_weight)` by id, with absent values read as zero.
fn semantic_index<'a>(
    entries: impl Iterator<Item = (&'a str, Option<f64>, Option<f64>)>,
) -> HashMap<&'a str, (f64, f64)> {
    entries
        .map(|(id, score, note_weight)| (id, (score.unwrap_or(0.0), note_weight.unwrap_or(0.0))))
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn rank_topics(
    topics: Vec<Topic>,
    query: &str,
    continuity: &[String],
    semantics: &HashMap<&str, (f64, f64)>,
    limit: usize,
) -> Vec<(Topic, f64)> {
    let mut scored: Vec<(Topic, f64, bool)> = topics
        .into_iter()
        .map(|topic| {
            let (semantic, note_weight) =
                semantics.get(topic.id.as_str()).copied().unwrap_or((0.0, 0.0));
            let position = continuity.iter().position(|id| *id == topic.id);
            let recency = position.map_or(0.0, |i| (0.9 - 0.08 * i as f64).max(0.5));
            let lexical = jaccard_similarity(query, &topic.name) * 0.8;
            let score = (semantic + note_weight.min(NOTE_WEIGHT_CAP)).max(recency).max(lexical);
            (topic, score, position.is_some())
        })
        .collect();
    scored.retain(|(_, score, in_session)| *score > TOPIC_SCORE_FLOOR || *in_session);
    // Stable sort keeps the board's iteration order on ties.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored.into_iter().map(|(topic, score, _)| (topic, score)).collect()
}

fn rank_tasks(
    tasks: &[Task],
    query: &str,
    touched: &HashSet<String>,
    semantics: &HashMap<&str, (f64, f64)>,
    limit: usize,
) -> Vec<RankedTask> {
    let scored: Vec<f64> = tasks
        .iter()
        .map(|task| {
            let (semantic, note_weight) =
                semantics.get(task.id.as_str()).copied().unwrap_or((0.0, 0.0));
            let touch = if touched.contains(&task.id) { 0.25 } else { 0.0 };
            jaccard_similarity(query, &task.title)
                + touch
                + semantic
                + note_weight.min(NOTE_WEIGHT_CAP)
        })
        .collect();

    let mut order: Vec<usize> = (0..tasks.len()).collect();
    order.sort_by(|&a, &b| scored[b].partial_cmp(&scored[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut picked: Vec<usize> = order
        .into_iter()
        .filter(|&idx| scored[idx] > TASK_SCORE_FLOOR)
        .take(limit)
        .collect();
    // Pad below-floor tasks in board order up to the limit.
    for idx in 0..tasks.len() {
        if picked.len() >= limit {
            break;
        }
        if !picked.contains(&idx) {
            picked.push(idx);
        }
    }

    picked
        .into_iter()
        .map(|idx| RankedTask { task: tasks[idx].clone(), score: scored[idx] })
        .collect()
}

/// Pinned note lines for one topic, clipped for block rendering.
fn topic_memory(topic_id: &str, notes: &[LogRow]) -> Vec<String> {
    notes
        .iter()
        .filter(|row| row.topic_id.as_deref() == Some(topic_id))
        .take(TOPIC_MEMORY_LINES)
        .map(note_line)
        .collect()
}

/// Search hits from other sessions, deduplicated by rendered line.
fn signal_lines(rows: &[LogRow], session_key: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for row in rows {
        // Rows from the current session already feed the timeline section.
        let own_session =
            row.source.as_ref().and_then(|s| s.session_key.as_deref()) == Some(session_key);
        if own_session {
            continue;
        }
        let line = note_line(row);
        if line.is_empty() {
            continue;
        }
        if seen.insert(line.clone()) {
            lines.push(line);
        }
        if lines.len() >= SIGNAL_LIMIT {
            break;
        }
    }
    lines
}

fn note_line(row: &LogRow) -> String {
    derive_summary(row.summary.as_deref().unwrap_or(&row.content), LINE_CLIP_CHARS)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
