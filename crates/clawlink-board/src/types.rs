//! Wire types for the Clawboard HTTP API.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the board
//! service's JSON format. Response types mark every non-essential field
//! `#[serde(default)]` so a newer or older board deployment cannot break
//! deserialization.

use serde::{Deserialize, Serialize};

/// Category of a board log row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// A user or assistant conversational turn.
    Conversation,
    /// A tool call, run-completion marker, or other non-conversational event.
    Action,
    /// A curated note, usually attached to another log via `relatedLogId`.
    Note,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conversation => write!(f, "conversation"),
            Self::Action => write!(f, "action"),
            Self::Note => write!(f, "note"),
        }
    }
}

/// Provenance block attached to every outbound log payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogSource {
    /// Transport channel id (e.g. a chat provider id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Effective session key the event resolved to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// Transport message id, when the provider supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Originating board request id, recovered via scope links or lookup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Topic inherited from a parent board scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board_scope_topic_id: Option<String>,
    /// Task inherited from a parent board scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board_scope_task_id: Option<String>,
    /// True when the scope came from spawn linkage rather than the event's
    /// own session key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board_scope_inherited: Option<bool>,
}

/// Outbound log payload for `POST /api/log` / `/api/ingest`.
///
/// Owned exclusively by the delivery pipeline from construction to
/// transmission; immutable once handed to `send`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    /// Log category.
    #[serde(rename = "type")]
    pub kind: LogKind,
    /// Logical author (`user`, `assistant`, or an agent id).
    pub agent_id: String,
    /// Display label for the author.
    pub agent_label: String,
    /// Sanitized body text.
    pub content: String,
    /// One-line summary derived at capture time.
    pub summary: String,
    /// Redacted structured payload (tool parameters/results).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    /// Board topic scope, when resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    /// Board task scope, when resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Log row this payload annotates (notes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_log_id: Option<i64>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Deterministic dedup key; also sent as the `X-Idempotency-Key` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Provenance.
    #[serde(default)]
    pub source: LogSource,
}

/// A stored log row returned by `GET /api/log`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRow {
    /// Row id assigned by the board service.
    pub id: i64,
    /// Log category.
    #[serde(rename = "type")]
    pub kind: LogKind,
    /// Logical author.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Display label.
    #[serde(default)]
    pub agent_label: Option<String>,
    /// Body text.
    #[serde(default)]
    pub content: String,
    /// One-line summary.
    #[serde(default)]
    pub summary: Option<String>,
    /// Topic scope.
    #[serde(default)]
    pub topic_id: Option<String>,
    /// Task scope.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Related log row (notes).
    #[serde(default)]
    pub related_log_id: Option<i64>,
    /// RFC 3339 creation timestamp.
    #[serde(default)]
    pub created_at: String,
    /// Ranking score, present on search results.
    #[serde(default)]
    pub score: Option<f64>,
    /// Curated-note weight, present on search results.
    #[serde(default)]
    pub note_weight: Option<f64>,
    /// Provenance recorded at capture time.
    #[serde(default)]
    pub source: Option<LogSource>,
}

/// A board topic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    /// Topic id (`topic-` prefixed).
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// RFC 3339 last-touched timestamp.
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Ranking score, present on search results.
    #[serde(default)]
    pub score: Option<f64>,
    /// Curated-note weight, present on search results.
    #[serde(default)]
    pub note_weight: Option<f64>,
}

/// A board task.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task id (`task-` prefixed).
    pub id: String,
    /// Owning topic.
    #[serde(default)]
    pub topic_id: Option<String>,
    /// Task title.
    #[serde(default)]
    pub title: String,
    /// Workflow status (board-defined).
    #[serde(default)]
    pub status: Option<String>,
    /// RFC 3339 last-touched timestamp.
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Ranking score, present on search results.
    #[serde(default)]
    pub score: Option<f64>,
    /// Curated-note weight, present on search results.
    #[serde(default)]
    pub note_weight: Option<f64>,
}

/// Response shape of `GET /api/search`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchResponse {
    /// Ranking mode the service applied.
    pub mode: Option<String>,
    /// Scored topics.
    pub topics: Vec<Topic>,
    /// Scored tasks.
    pub tasks: Vec<Task>,
    /// Scored logs.
    pub logs: Vec<LogRow>,
    /// Scored curated notes.
    pub notes: Vec<LogRow>,
}

/// Response shape of `GET /api/context`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextResponse {
    /// Pre-assembled context block, absent when the service found nothing.
    pub block: Option<String>,
}

/// Body for `POST /api/topics` (upsert).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicUpsert {
    /// Stable id; omitted to let the service mint one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Free-form tags.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Query parameters for `GET /api/log`.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    /// Filter by effective session key.
    pub session_key: Option<String>,
    /// Filter by log category.
    pub kind: Option<LogKind>,
    /// Maximum rows.
    pub limit: Option<usize>,
    /// Pagination offset.
    pub offset: Option<usize>,
    /// Rows annotating a specific log (notes).
    pub related_log_id: Option<i64>,
}

/// Query parameters for `GET /api/search`.
#[derive(Clone, Debug, Default)]
pub struct SearchQuery {
    /// Normalized query text.
    pub q: String,
    /// Session key for continuity weighting.
    pub session_key: Option<String>,
    /// Include pending/unconfirmed rows.
    pub include_pending: bool,
    /// Topic result cap.
    pub limit_topics: Option<usize>,
    /// Task result cap.
    pub limit_tasks: Option<usize>,
    /// Log result cap.
    pub limit_logs: Option<usize>,
}

/// Query parameters for `GET /api/context`.
#[derive(Clone, Debug, Default)]
pub struct ContextQuery {
    /// Normalized query text.
    pub q: String,
    /// Session key the block is assembled for.
    pub session_key: String,
    /// Retrieval mode (opaque to the agent).
    pub mode: String,
    /// Character budget for the block.
    pub max_chars: Option<usize>,
    /// Working-set (topic) cap.
    pub working_set_limit: Option<usize>,
    /// Timeline entry cap.
    pub timeline_limit: Option<usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> LogPayload {
        LogPayload {
            kind: LogKind::Conversation,
            agent_id: "user".to_string(),
            agent_label: "User".to_string(),
            content: "ship the rollout plan".to_string(),
            summary: "ship the rollout plan".to_string(),
            raw: None,
            topic_id: Some("topic-infra".to_string()),
            task_id: None,
            related_log_id: None,
            created_at: "2026-08-20T12:00:00.000Z".to_string(),
            idempotency_key: Some("abc123".to_string()),
            source: LogSource {
                channel: Some("discord".to_string()),
                session_key: Some("clawboard:topic:topic-infra".to_string()),
                message_id: Some("m1".to_string()),
                ..LogSource::default()
            },
        }
    }

    #[test]
    fn log_kind_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&LogKind::Conversation).unwrap(),
            "\"conversation\""
        );
        let back: LogKind = serde_json::from_str("\"action\"").unwrap();
        assert_eq!(back, LogKind::Action);
        assert_eq!(LogKind::Note.to_string(), "note");
    }

    #[test]
    fn payload_serializes_type_field() {
        let json = serde_json::to_value(sample_payload()).unwrap();
        assert_eq!(json["type"], "conversation");
        assert_eq!(json["agentId"], "user");
        assert_eq!(json["topicId"], "topic-infra");
        assert_eq!(json["idempotencyKey"], "abc123");
        assert_eq!(json["source"]["messageId"], "m1");
        // None fields are omitted
        assert!(json.get("taskId").is_none());
        assert!(json.get("raw").is_none());
        assert!(json["source"].get("requestId").is_none());
    }

    #[test]
    fn payload_roundtrip() {
        let payload = sample_payload();
        let json = serde_json::to_string(&payload).unwrap();
        let back: LogPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, LogKind::Conversation);
        assert_eq!(back.content, payload.content);
        assert_eq!(back.source.session_key, payload.source.session_key);
        assert_eq!(back.idempotency_key, payload.idempotency_key);
    }

    #[test]
    fn source_inherited_flag_serializes() {
        let source = LogSource {
            board_scope_topic_id: Some("topic-infra".to_string()),
            board_scope_task_id: Some("task-rollout".to_string()),
            board_scope_inherited: Some(true),
            ..LogSource::default()
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["boardScopeTopicId"], "topic-infra");
        assert_eq!(json["boardScopeInherited"], true);
    }

    #[test]
    fn log_row_parses_minimal_json() {
        let row: LogRow =
            serde_json::from_value(serde_json::json!({"id": 7, "type": "note"})).unwrap();
        assert_eq!(row.id, 7);
        assert_eq!(row.kind, LogKind::Note);
        assert!(row.content.is_empty());
        assert!(row.source.is_none());
    }

    #[test]
    fn topic_parses_with_score_fields() {
        let topic: Topic = serde_json::from_value(serde_json::json!({
            "id": "topic-infra",
            "name": "Infra",
            "score": 0.42,
            "noteWeight": 0.1
        }))
        .unwrap();
        assert_eq!(topic.score, Some(0.42));
        assert_eq!(topic.note_weight, Some(0.1));
        assert!(topic.tags.is_empty());
    }

    #[test]
    fn search_response_tolerates_missing_sections() {
        let resp: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.topics.is_empty());
        assert!(resp.notes.is_empty());
        assert!(resp.mode.is_none());
    }

    #[test]
    fn context_response_block_optional() {
        let resp: ContextResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.block.is_none());

        let resp: ContextResponse =
            serde_json::from_value(serde_json::json!({"block": "ranked context"})).unwrap();
        assert_eq!(resp.block.as_deref(), Some("ranked context"));
    }

    #[test]
    fn topic_upsert_omits_absent_id() {
        let upsert = TopicUpsert {
            id: None,
            name: "Discord general".to_string(),
            tags: None,
        };
        let json = serde_json::to_value(&upsert).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["name"], "Discord general");
    }
}
