//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the settings
//! file's JSON wire format. Each type implements [`Default`] with production
//! default values, and `#[serde(default)]` lets partial JSON files supply
//! only the fields they change.

use serde::{Deserialize, Serialize};

use clawlink_core::constants::DEFAULT_IGNORED_SESSION_PREFIXES;

/// Root settings type for the Clawlink agent.
///
/// Loaded from `~/.clawlink/settings.json` with defaults applied for missing
/// fields, then `CLAWLINK_*` environment overrides on top.
///
/// # JSON Format
///
/// All field names are camelCase. Optional values (`token`,
/// `defaultTopicId`, `defaultTaskId`) are omitted when `None`. Example:
///
/// ```json
/// {
///   "baseUrl": "https://board.example.net",
///   "token": "cb_live_...",
///   "context": { "mode": "focused", "maxChars": 4000 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClawlinkSettings {
    /// Settings schema version.
    pub version: String,
    /// Master switch; when false every hook is a no-op.
    pub enabled: bool,
    /// Base URL of the Clawboard service.
    pub base_url: String,
    /// Optional bearer token for the Clawboard API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Path to the durable delivery queue database. A leading `~` expands to
    /// the home directory at load time.
    pub queue_db: String,
    /// Display label attached to assistant-authored logs when no better
    /// label can be resolved from the event.
    pub agent_label: String,
    /// Board topic applied to payloads that resolved no scope of their own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_topic_id: Option<String>,
    /// Board task applied alongside [`Self::default_topic_id`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_task_id: Option<String>,
    /// Auto-provision a board topic per channel session.
    pub auto_topic_by_session: bool,
    /// Session-key prefixes whose traffic is never logged (case-insensitive,
    /// matched at the key start or after an `agent:<id>:` prefix).
    pub ignored_session_prefixes: Vec<String>,
    /// Delivery pipeline tuning.
    pub delivery: DeliverySettings,
    /// Context retrieval and injection tuning.
    pub context: ContextSettings,
    /// Diagnostic logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ClawlinkSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            enabled: true,
            base_url: "http://localhost:4710".to_string(),
            token: None,
            queue_db: "~/.clawlink/queue.db".to_string(),
            agent_label: "Assistant".to_string(),
            default_topic_id: None,
            default_task_id: None,
            auto_topic_by_session: false,
            ignored_session_prefixes: DEFAULT_IGNORED_SESSION_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
            delivery: DeliverySettings::default(),
            context: ContextSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Delivery pipeline tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
    /// Per-request timeout for `POST /api/log`, in milliseconds.
    pub request_timeout_ms: u64,
    /// Total deadline for the immediate-send retry loop, in milliseconds.
    pub send_deadline_ms: u64,
    /// Background drain timer period, in milliseconds.
    pub drain_interval_ms: u64,
    /// Maximum queue entries attempted per opportunistic drain pass.
    pub drain_batch_size: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 4_000,
            send_deadline_ms: 10_000,
            drain_interval_ms: 2_000,
            drain_batch_size: 25,
        }
    }
}

/// Context retrieval and injection tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// Master switch for context augmentation.
    pub enabled: bool,
    /// Retrieval mode requested from the context API. Opaque to the agent;
    /// forwarded as the `mode` query parameter.
    pub mode: String,
    /// Mode retried once when the primary mode returns an empty block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_mode: Option<String>,
    /// Per-fetch timeout, in milliseconds.
    pub timeout_ms: u64,
    /// Shared total budget across primary, fallback, and local ranking, in
    /// milliseconds.
    pub budget_ms: u64,
    /// Hard character cap on the assembled context block.
    pub max_chars: usize,
    /// Maximum topics retained by the local ranker.
    pub topic_limit: usize,
    /// Maximum tasks retained per topic.
    pub task_limit: usize,
    /// Recent conversation logs fetched per session.
    pub log_limit: usize,
    /// Timeline entries kept in the assembled block.
    pub timeline_limit: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: "focused".to_string(),
            fallback_mode: Some("broad".to_string()),
            timeout_ms: 3_500,
            budget_ms: 8_000,
            max_chars: 6_000,
            topic_limit: 5,
            task_limit: 4,
            log_limit: 30,
            timeline_limit: 12,
        }
    }
}

/// Diagnostic logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default tracing filter when `CLAWLINK_LOG` is unset.
    pub level: String,
    /// Persist warn/error diagnostics into the queue database.
    pub transport_enabled: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            transport_enabled: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
