//! `reqwest`-backed [`BoardApi`] implementation.
//!
//! One client per process. Every request carries the configured timeout, a
//! `clawlink-agent/<version>` user agent, and (when configured) a bearer
//! token. Log delivery targets `/api/ingest` when durable queueing is
//! enabled, `/api/log` otherwise; the choice is fixed at construction.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use clawlink_core::constants::VERSION;

use crate::api::BoardApi;
use crate::errors::{BoardError, BoardResult};
use crate::types::{
    ContextQuery, ContextResponse, LogPayload, LogQuery, LogRow, SearchQuery, SearchResponse,
    Task, Topic, TopicUpsert,
};

/// Header carrying the delivery dedup key.
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Maximum error-body characters preserved in [`BoardError::Api`].
const ERROR_BODY_CHARS: usize = 300;

/// Connection settings for [`HttpBoardClient`].
#[derive(Clone, Debug)]
pub struct BoardClientConfig {
    /// Service base URL, with or without a trailing slash.
    pub base_url: String,
    /// Optional bearer token.
    pub token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Deliver logs to `/api/ingest` instead of `/api/log`.
    pub use_ingest: bool,
}

impl Default for BoardClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4710".to_string(),
            token: None,
            request_timeout: Duration::from_millis(4_000),
            use_ingest: true,
        }
    }
}

/// HTTP client for the Clawboard service.
pub struct HttpBoardClient {
    config: BoardClientConfig,
    client: reqwest::Client,
}

impl HttpBoardClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::Http`] if the underlying client cannot be
    /// constructed.
    pub fn new(mut config: BoardClientConfig) -> BoardResult<Self> {
        while config.base_url.ends_with('/') {
            let _ = config.base_url.pop();
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("clawlink-agent/{VERSION}"))
            .build()?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn ingest_path(&self) -> &'static str {
        if self.config.use_ingest {
            "/api/ingest"
        } else {
            "/api/log"
        }
    }
}

/// Convert a non-success response into [`BoardError::Api`].
async fn ok_or_api_error(response: reqwest::Response) -> BoardResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BoardError::Api {
        status: status.as_u16(),
        message: body.chars().take(ERROR_BODY_CHARS).collect(),
    })
}

#[async_trait]
impl BoardApi for HttpBoardClient {
    async fn post_log(&self, payload: &LogPayload) -> BoardResult<()> {
        let mut request = self
            .authorize(self.client.post(self.url(self.ingest_path())))
            .json(payload);
        if let Some(key) = &payload.idempotency_key {
            request = request.header(IDEMPOTENCY_HEADER, key);
        }

        debug!(
            kind = %payload.kind,
            session_key = payload.source.session_key.as_deref().unwrap_or(""),
            "posting log payload"
        );
        let response = request.send().await?;
        let _ = ok_or_api_error(response).await?;
        Ok(())
    }

    async fn get_logs(&self, query: &LogQuery) -> BoardResult<Vec<LogRow>> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(key) = &query.session_key {
            params.push(("sessionKey", key.clone()));
        }
        if let Some(kind) = query.kind {
            params.push(("type", kind.to_string()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(offset) = query.offset {
            params.push(("offset", offset.to_string()));
        }
        if let Some(related) = query.related_log_id {
            params.push(("relatedLogId", related.to_string()));
        }

        let response = self
            .authorize(self.client.get(self.url("/api/log")))
            .query(&params)
            .send()
            .await?;
        Ok(ok_or_api_error(response).await?.json().await?)
    }

    async fn get_topics(&self) -> BoardResult<Vec<Topic>> {
        let response = self
            .authorize(self.client.get(self.url("/api/topics")))
            .send()
            .await?;
        Ok(ok_or_api_error(response).await?.json().await?)
    }

    async fn get_tasks(&self, topic_id: &str) -> BoardResult<Vec<Task>> {
        let response = self
            .authorize(self.client.get(self.url("/api/tasks")))
            .query(&[("topicId", topic_id)])
            .send()
            .await?;
        Ok(ok_or_api_error(response).await?.json().await?)
    }

    async fn search(&self, query: &SearchQuery) -> BoardResult<SearchResponse> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", query.q.clone()),
            ("includePending", query.include_pending.to_string()),
        ];
        if let Some(key) = &query.session_key {
            params.push(("sessionKey", key.clone()));
        }
        if let Some(limit) = query.limit_topics {
            params.push(("limitTopics", limit.to_string()));
        }
        if let Some(limit) = query.limit_tasks {
            params.push(("limitTasks", limit.to_string()));
        }
        if let Some(limit) = query.limit_logs {
            params.push(("limitLogs", limit.to_string()));
        }

        let response = self
            .authorize(self.client.get(self.url("/api/search")))
            .query(&params)
            .send()
            .await?;
        Ok(ok_or_api_error(response).await?.json().await?)
    }

    async fn get_context(&self, query: &ContextQuery) -> BoardResult<Option<String>> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", query.q.clone()),
            ("sessionKey", query.session_key.clone()),
            ("mode", query.mode.clone()),
        ];
        if let Some(max_chars) = query.max_chars {
            params.push(("maxChars", max_chars.to_string()));
        }
        if let Some(limit) = query.working_set_limit {
            params.push(("workingSetLimit", limit.to_string()));
        }
        if let Some(limit) = query.timeline_limit {
            params.push(("timelineLimit", limit.to_string()));
        }

        debug!(mode = %query.mode, session_key = %query.session_key, "fetching context block");
        let response = self
            .authorize(self.client.get(self.url("/api/context")))
            .query(&params)
            .send()
            .await?;
        let parsed: ContextResponse = ok_or_api_error(response).await?.json().await?;
        Ok(parsed.block.filter(|block| !block.trim().is_empty()))
    }

    async fn upsert_topic(&self, upsert: &TopicUpsert) -> BoardResult<Topic> {
        let response = self
            .authorize(self.client.post(self.url("/api/topics")))
            .json(upsert)
            .send()
            .await?;
        Ok(ok_or_api_error(response).await?.json().await?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
