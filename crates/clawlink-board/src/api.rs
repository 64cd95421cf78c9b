//! # `BoardApi` Trait
//!
//! Core abstraction over the Clawboard HTTP surface. The delivery pipeline,
//! capture handlers, and context engine all program against this trait, so
//! tests can swap the network for in-process fakes.

use async_trait::async_trait;

use crate::errors::BoardResult;
use crate::types::{
    ContextQuery, LogPayload, LogQuery, LogRow, SearchQuery, SearchResponse, Task, Topic,
    TopicUpsert,
};

/// Client surface of the Clawboard service.
///
/// Implementors must be `Send + Sync` for use across async tasks. Every
/// method maps 1:1 to a board endpoint; none of them retries internally,
/// that policy belongs to the callers.
#[async_trait]
pub trait BoardApi: Send + Sync {
    /// Deliver one log payload. The payload's idempotency key travels as the
    /// `X-Idempotency-Key` header so the service can dedup replays.
    async fn post_log(&self, payload: &LogPayload) -> BoardResult<()>;

    /// Fetch stored log rows matching the query.
    async fn get_logs(&self, query: &LogQuery) -> BoardResult<Vec<LogRow>>;

    /// Fetch all topics.
    async fn get_topics(&self) -> BoardResult<Vec<Topic>>;

    /// Fetch the tasks belonging to one topic.
    async fn get_tasks(&self, topic_id: &str) -> BoardResult<Vec<Task>>;

    /// Run a hybrid lexical/semantic search.
    async fn search(&self, query: &SearchQuery) -> BoardResult<SearchResponse>;

    /// Ask the service for a pre-ranked context block. `None` means the
    /// service had nothing for this query.
    async fn get_context(&self, query: &ContextQuery) -> BoardResult<Option<String>>;

    /// Create or update a topic.
    async fn upsert_topic(&self, upsert: &TopicUpsert) -> BoardResult<Topic>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
