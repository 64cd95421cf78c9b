//! Retrieval orchestration for the `beforeAgentStart` hook.
//!
//! The engine tries the board's context endpoint in the configured mode,
//! retries once in the fallback mode, and finally ranks raw rows locally.
//! The whole attempt runs under one wall-clock budget; exhausting it means
//! the turn starts without injected context, never late.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clawlink_board::{BoardApi, ContextQuery};
use clawlink_core::{
    CONTEXT_BLOCK_BEGIN, CONTEXT_BLOCK_END, KeySource, compute_effective_session_key,
    is_classifier_payload_text, should_ignore_session_key,
};
use clawlink_settings::ClawlinkSettings;
use tracing::debug;

use crate::block::assemble_block;
use crate::query::{is_heartbeat_prompt, normalize_query};
use crate::ranker::local_rank;

/// Usage instruction appended inside the markers. Models otherwise tend to
/// answer that they cannot look things up even with the context in front of
/// them.
pub const RETRIEVAL_INSTRUCTION: &str =
    "Context above was retrieved from the board; use it and do not claim retrieval is unavailable.";

/// Mode label reported when the local ranker produced the block.
const LOCAL_MODE: &str = "local";

/// Orchestrates context retrieval ahead of an agent turn.
pub struct ContextEngine {
    settings: Arc<ClawlinkSettings>,
    api: Arc<dyn BoardApi>,
}

impl ContextEngine {
    /// An engine reading retrieval settings from `settings` and fetching
    /// through `api`.
    #[must_use]
    pub fn new(settings: Arc<ClawlinkSettings>, api: Arc<dyn BoardApi>) -> Self {
        Self { settings, api }
    }

    /// Produce the wrapped context block for a turn, or `None` when the turn
    /// should start without injection. Fetch errors, empty results, and
    /// timeouts all land on `None`; retrieval never fails a turn.
    pub async fn before_agent_start(
        &self,
        meta: &KeySource,
        ctx: &KeySource,
        prompt: &str,
    ) -> Option<String> {
        let context = &self.settings.context;
        if !self.settings.enabled || !context.enabled {
            return None;
        }
        if is_classifier_payload_text(prompt) {
            return None;
        }
        let key = compute_effective_session_key(meta, ctx)?;
        if should_ignore_session_key(key.as_str(), &self.settings.ignored_session_prefixes) {
            return None;
        }
        let query = normalize_query(prompt);
        if query.is_empty() {
            return None;
        }
        if is_heartbeat_prompt(&query) {
            debug!("heartbeat prompt; skipping context retrieval");
            return None;
        }

        let deadline = Instant::now() + Duration::from_millis(context.budget_ms);

        if let Some(block) =
            self.context_api_block(&query, key.as_str(), &context.mode, deadline).await
        {
            return Some(wrap_block(&block));
        }
        let fallback = context.fallback_mode.as_deref().filter(|m| *m != context.mode);
        if let Some(mode) = fallback {
            if let Some(block) = self.context_api_block(&query, key.as_str(), mode, deadline).await
            {
                return Some(wrap_block(&block));
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("retrieval budget exhausted before local ranking");
            return None;
        }
        let Ok(ranking) = tokio::time::timeout(
            remaining,
            local_rank(self.api.as_ref(), context, &query, key.as_str()),
        )
        .await
        else {
            debug!("local ranking timed out");
            return None;
        };
        if ranking.is_empty() {
            return None;
        }
        let block =
            assemble_block(&query, LOCAL_MODE, &ranking, context.max_chars, context.timeline_limit);
        if block.is_empty() {
            return None;
        }
        Some(wrap_block(&block))
    }

    /// One attempt against the board's context endpoint, bounded by the
    /// per-fetch timeout and whatever remains of the overall budget.
    async fn context_api_block(
        &self,
        query: &str,
        session_key: &str,
        mode: &str,
        deadline: Instant,
    ) -> Option<String> {
        let context = &self.settings.context;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let fetch = Duration::from_millis(context.timeout_ms).min(remaining);
        if fetch.is_zero() {
            return None;
        }
        let request = ContextQuery {
            q: query.to_owned(),
            session_key: session_key.to_owned(),
            mode: mode.to_owned(),
            max_chars: Some(context.max_chars),
            working_set_limit: Some(context.topic_limit),
            timeline_limit: Some(context.timeline_limit),
        };
        match tokio::time::timeout(fetch, self.api.get_context(&request)).await {
            Ok(Ok(Some(block))) if !block.trim().is_empty() => Some(block),
            Ok(Ok(_)) => None,
            Ok(Err(err)) => {
                debug!(mode, error = %err, "context fetch failed");
                None
            }
            Err(_) => {
                debug!(mode, "context fetch timed out");
                None
            }
        }
    }
}

/// Wrap block text in the sentinel markers. The usage instruction sits
/// inside the markers so the whole injection strips cleanly from captured
/// message text.
#[must_use]
pub fn wrap_block(block: &str) -> String {
    format!("{CONTEXT_BLOCK_BEGIN}\n{block}\n{RETRIEVAL_INSTRUCTION}\n{CONTEXT_BLOCK_END}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clawlink_board::{
        BoardResult, LogKind, LogPayload, LogQuery, LogRow, LogSource, SearchQuery,
        SearchResponse, Task, Topic, TopicUpsert,
    };
    use clawlink_settings::ContextSettings;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    const SESSION: &str = "channel:discord-7";

    #[derive(Default)]
    struct FakeBoard {
        blocks: HashMap<String, String>,
        context_calls: Mutex<Vec<ContextQuery>>,
        topics: Vec<Topic>,
        logs: Vec<LogRow>,
        tasks: HashMap<String, Vec<Task>>,
    }

    #[async_trait]
    impl BoardApi for FakeBoard {
        async fn post_log(&self, _payload: &LogPayload) -> BoardResult<()> {
            Ok(())
        }

        async fn get_logs(&self, _query: &LogQuery) -> BoardResult<Vec<LogRow>> {
            Ok(self.logs.clone())
        }

        async fn get_topics(&self) -> BoardResult<Vec<Topic>> {
            Ok(self.topics.clone())
        }

        async fn get_tasks(&self, topic_id: &str) -> BoardResult<Vec<Task>> {
            Ok(self.tasks.get(topic_id).cloned().unwrap_or_default())
        }

        async fn search(&self, _query: &SearchQuery) -> BoardResult<SearchResponse> {
            Ok(SearchResponse::default())
        }

        async fn get_context(&self, query: &ContextQuery) -> BoardResult<Option<String>> {
            self.context_calls.lock().push(query.clone());
            Ok(self.blocks.get(&query.mode).cloned())
        }

        async fn upsert_topic(&self, upsert: &TopicUpsert) -> BoardResult<Topic> {
            Ok(Topic {
                id: upsert.id.clone().unwrap_or_default(),
                name: upsert.name.clone(),
                tags: upsert.tags.clone().unwrap_or_default(),
                updated_at: None,
                score: None,
                note_weight: None,
            })
        }
    }

    fn context_engine_with(
        board: FakeBoard,
        settings: ClawlinkSettings,
    ) -> (ContextEngine, Arc<FakeBoard>) {
        let board = Arc::new(board);
        let engine = ContextEngine::new(Arc::new(settings), board.clone() as Arc<dyn BoardApi>);
        (engine, board)
    }

    fn context_engine(board: FakeBoard) -> (ContextEngine, Arc<FakeBoard>) {
        context_engine_with(board, ClawlinkSettings::default())
    }

    fn discord_meta() -> KeySource {
        KeySource {
            channel_id: Some("discord".to_owned()),
            conversation_id: Some(SESSION.to_owned()),
            ..KeySource::default()
        }
    }

    fn topic(id: &str, name: &str) -> Topic {
        Topic {
            id: id.to_owned(),
            name: name.to_owned(),
            tags: Vec::new(),
            updated_at: None,
            score: None,
            note_weight: None,
        }
    }

    fn session_row(id: i64, topic_id: &str) -> LogRow {
        LogRow {
            id,
            kind: LogKind::Conversation,
            agent_id: None,
            agent_label: Some("User".to_owned()),
            content: format!("row {id}"),
            summary: None,
            topic_id: Some(topic_id.to_owned()),
            task_id: None,
            related_log_id: None,
            created_at: "2026-08-20T12:00:00.000Z".to_owned(),
            score: None,
            note_weight: None,
            source: Some(LogSource {
                session_key: Some(SESSION.to_owned()),
                ..LogSource::default()
            }),
        }
    }

    fn focused_block() -> HashMap<String, String> {
        let mut blocks = HashMap::new();
        blocks.insert("focused".to_owned(), "Focused board context".to_owned());
        blocks
    }

    #[tokio::test]
    async fn primary_block_is_wrapped_with_markers() {
        let (engine, board) =
            context_engine(FakeBoard { blocks: focused_block(), ..FakeBoard::default() });

        let wrapped = engine
            .before_agent_start(&discord_meta(), &KeySource::default(), "plan the rollout")
            .await
            .unwrap();

        assert!(wrapped.starts_with(CONTEXT_BLOCK_BEGIN));
        assert!(wrapped.ends_with(CONTEXT_BLOCK_END));
        assert!(wrapped.contains("Focused board context"));
        assert!(wrapped.contains(RETRIEVAL_INSTRUCTION));

        let calls = board.context_calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].mode, "focused");
        assert_eq!(calls[0].session_key, SESSION);
        assert_eq!(calls[0].q, "plan the rollout");
        assert_eq!(calls[0].max_chars, Some(6000));
    }

    #[tokio::test]
    async fn fallback_mode_is_tried_once() {
        let mut blocks = HashMap::new();
        blocks.insert("broad".to_owned(), "Broad board context".to_owned());
        let (engine, board) = context_engine(FakeBoard { blocks, ..FakeBoard::default() });

        let wrapped = engine
            .before_agent_start(&discord_meta(), &KeySource::default(), "plan the rollout")
            .await
            .unwrap();

        assert!(wrapped.contains("Broad board context"));
        let modes: Vec<String> =
            board.context_calls.lock().iter().map(|c| c.mode.clone()).collect();
        assert_eq!(modes, ["focused", "broad"]);
    }

    #[tokio::test]
    async fn same_fallback_mode_not_retried() {
        let settings = ClawlinkSettings {
            context: ContextSettings {
                fallback_mode: Some("focused".to_owned()),
                ..ContextSettings::default()
            },
            ..ClawlinkSettings::default()
        };
        let (engine, board) = context_engine_with(FakeBoard::default(), settings);

        let got = engine
            .before_agent_start(&discord_meta(), &KeySource::default(), "plan the rollout")
            .await;

        assert!(got.is_none());
        assert_eq!(board.context_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn local_ranker_covers_empty_api() {
        let board = FakeBoard {
            topics: vec![topic("topic-infra", "Infra")],
            logs: vec![session_row(1, "topic-infra")],
            ..FakeBoard::default()
        };
        let (engine, board) = context_engine(board);

        let wrapped = engine
            .before_agent_start(&discord_meta(), &KeySource::default(), "plan the rollout")
            .await
            .unwrap();

        // Both modes were tried before falling back to the local ranker.
        assert_eq!(board.context_calls.lock().len(), 2);
        assert!(wrapped.contains("Retrieval mode: local"));
        assert!(wrapped.contains("Working set:"));
        assert!(wrapped.contains("Infra"));
        assert!(wrapped.starts_with(CONTEXT_BLOCK_BEGIN));
    }

    #[tokio::test]
    async fn augmentation_disabled_short_circuits() {
        let settings = ClawlinkSettings {
            context: ContextSettings { enabled: false, ..ContextSettings::default() },
            ..ClawlinkSettings::default()
        };
        let (engine, board) =
            context_engine_with(FakeBoard { blocks: focused_block(), ..FakeBoard::default() }, settings);

        let got = engine
            .before_agent_start(&discord_meta(), &KeySource::default(), "plan the rollout")
            .await;

        assert!(got.is_none());
        assert!(board.context_calls.lock().is_empty());

        let disabled = ClawlinkSettings { enabled: false, ..ClawlinkSettings::default() };
        let (engine, board) =
            context_engine_with(FakeBoard { blocks: focused_block(), ..FakeBoard::default() }, disabled);
        let got = engine
            .before_agent_start(&discord_meta(), &KeySource::default(), "plan the rollout")
            .await;
        assert!(got.is_none());
        assert!(board.context_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn heartbeat_prompt_skips_retrieval() {
        let (engine, board) =
            context_engine(FakeBoard { blocks: focused_block(), ..FakeBoard::default() });

        let got = engine
            .before_agent_start(
                &discord_meta(),
                &KeySource::default(),
                "Read HEARTBEAT.md and continue.",
            )
            .await;

        assert!(got.is_none());
        assert!(board.context_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn classifier_prompt_skips_retrieval() {
        let (engine, board) =
            context_engine(FakeBoard { blocks: focused_block(), ..FakeBoard::default() });

        let got = engine
            .before_agent_start(
                &discord_meta(),
                &KeySource::default(),
                r#"{"routeDecision": "skip", "confidence": 0.9}"#,
            )
            .await;

        assert!(got.is_none());
        assert!(board.context_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn ignored_session_skips_retrieval() {
        let (engine, board) =
            context_engine(FakeBoard { blocks: focused_block(), ..FakeBoard::default() });

        let got = engine
            .before_agent_start(
                &KeySource::default(),
                &KeySource::with_session_key("cron:nightly"),
                "plan the rollout",
            )
            .await;

        assert!(got.is_none());
        assert!(board.context_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn blank_prompt_yields_none() {
        let (engine, board) =
            context_engine(FakeBoard { blocks: focused_block(), ..FakeBoard::default() });

        let got =
            engine.before_agent_start(&discord_meta(), &KeySource::default(), "   \n  ").await;

        assert!(got.is_none());
        assert!(board.context_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_session_key_yields_none() {
        let (engine, board) =
            context_engine(FakeBoard { blocks: focused_block(), ..FakeBoard::default() });

        let got = engine
            .before_agent_start(&KeySource::default(), &KeySource::default(), "plan the rollout")
            .await;

        assert!(got.is_none());
        assert!(board.context_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn zero_budget_yields_none() {
        let settings = ClawlinkSettings {
            context: ContextSettings { budget_ms: 0, ..ContextSettings::default() },
            ..ClawlinkSettings::default()
        };
        let (engine, board) =
            context_engine_with(FakeBoard { blocks: focused_block(), ..FakeBoard::default() }, settings);

        let got = engine
            .before_agent_start(&discord_meta(), &KeySource::default(), "plan the rollout")
            .await;

        assert!(got.is_none());
        assert!(board.context_calls.lock().is_empty());
    }
}
