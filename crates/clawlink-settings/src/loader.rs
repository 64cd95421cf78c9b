//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ClawlinkSettings::default()`]
//! 2. If `~/.clawlink/settings.json` exists, deep-merge user values over
//!    defaults
//! 3. Apply `CLAWLINK_*` environment overrides (highest priority)
//! 4. Drop malformed `defaultTopicId`/`defaultTaskId` values with a warning
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use clawlink_core::ids::{TaskId, TopicId};

use crate::errors::Result;
use crate::types::ClawlinkSettings;

/// Resolve the path to the settings file (`~/.clawlink/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".clawlink").join("settings.json")
}

/// Expand a leading `~` or `~/` to the home directory.
///
/// Paths without a tilde prefix pass through unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    let home = || std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    if path == "~" {
        PathBuf::from(home())
    } else if let Some(rest) = path.strip_prefix("~/") {
        PathBuf::from(home()).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ClawlinkSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<ClawlinkSettings> {
    let defaults = serde_json::to_value(ClawlinkSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ClawlinkSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate_scope_defaults(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Each env var has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are logged at warn and ignored (fall back to
///   file/default)
pub fn apply_env_overrides(settings: &mut ClawlinkSettings) {
    // ── Core switches ───────────────────────────────────────────────
    if let Some(v) = read_env_bool("CLAWLINK_ENABLED") {
        settings.enabled = v;
    }
    if let Some(v) = read_env_string("CLAWLINK_BASE_URL") {
        settings.base_url = v;
    }
    if let Some(v) = read_env_string("CLAWLINK_TOKEN") {
        settings.token = Some(v);
    }
    if let Some(v) = read_env_string("CLAWLINK_QUEUE_DB") {
        settings.queue_db = v;
    }
    if let Some(v) = read_env_string("CLAWLINK_AGENT_LABEL") {
        settings.agent_label = v;
    }

    // ── Board scope ─────────────────────────────────────────────────
    if let Some(v) = read_env_string("CLAWLINK_DEFAULT_TOPIC") {
        settings.default_topic_id = Some(v);
    }
    if let Some(v) = read_env_string("CLAWLINK_DEFAULT_TASK") {
        settings.default_task_id = Some(v);
    }
    if let Some(v) = read_env_bool("CLAWLINK_AUTO_TOPIC") {
        settings.auto_topic_by_session = v;
    }
    if let Some(v) = read_env_string("CLAWLINK_IGNORED_SESSION_PREFIXES") {
        settings.ignored_session_prefixes = parse_prefix_list(&v);
    }

    // ── Delivery ────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("CLAWLINK_REQUEST_TIMEOUT_MS", 100, 120_000) {
        settings.delivery.request_timeout_ms = v;
    }

    // ── Context ─────────────────────────────────────────────────────
    if let Some(v) = read_env_bool("CLAWLINK_CONTEXT_ENABLED") {
        settings.context.enabled = v;
    }
    if let Some(v) = read_env_string("CLAWLINK_CONTEXT_MODE") {
        settings.context.mode = v;
    }
    if let Some(v) = read_env_string("CLAWLINK_CONTEXT_FALLBACK_MODE") {
        settings.context.fallback_mode = Some(v);
    }
    if let Some(v) = read_env_usize("CLAWLINK_CONTEXT_MAX_CHARS", 500, 100_000) {
        settings.context.max_chars = v;
    }
}

/// Drop configured default scope ids that fail entity-id validation.
///
/// A malformed `defaultTopicId` would poison every payload the default-scope
/// fallback touches, so invalid values are cleared rather than carried.
pub fn validate_scope_defaults(settings: &mut ClawlinkSettings) {
    if let Some(id) = &settings.default_topic_id {
        if TopicId::parse(id).is_none() {
            warn!(value = %id, "defaultTopicId is not a valid topic id, ignoring");
            settings.default_topic_id = None;
        }
    }
    if let Some(id) = &settings.default_task_id {
        if TaskId::parse(id).is_none() {
            warn!(value = %id, "defaultTaskId is not a valid task id, ignoring");
            settings.default_task_id = None;
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated prefix list, trimming whitespace and dropping
/// empty entries.
pub fn parse_prefix_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(ToString::to_string)
        .collect()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_simple_override() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": 10});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 10);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "context": {"maxChars": 6000, "mode": "focused"}
        });
        let source = serde_json::json!({
            "context": {"maxChars": 2000}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["context"]["maxChars"], 2000);
        assert_eq!(merged["context"]["mode"], "focused");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"ignoredSessionPrefixes": ["a:", "b:"]});
        let source = serde_json::json!({"ignoredSessionPrefixes": ["c:"]});
        let merged = deep_merge(target, source);
        assert_eq!(
            merged["ignoredSessionPrefixes"],
            serde_json::json!(["c:"])
        );
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"b": 2});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 42);
    }

    #[test]
    fn merge_empty_source() {
        let target = serde_json::json!({"a": 1, "b": {"c": 2}});
        let source = serde_json::json!({});
        let merged = deep_merge(target.clone(), source);
        assert_eq!(merged, target);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/settings.json");
        let settings = load_settings_from_path(path).unwrap();
        let defaults = ClawlinkSettings::default();
        assert_eq!(settings.base_url, defaults.base_url);
        assert_eq!(settings.context.max_chars, defaults.context.max_chars);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"baseUrl": "https://board.example.net", "context": {"topicLimit": 2}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.base_url, "https://board.example.net");
        assert_eq!(settings.context.topic_limit, 2);
        assert_eq!(settings.context.task_limit, 4);
        assert_eq!(settings.delivery.send_deadline_ms, 10_000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_prefix_list_replaces_not_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"ignoredSessionPrefixes": ["internal:"]}"#).unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.ignored_session_prefixes, vec!["internal:"]);
    }

    #[test]
    fn load_clears_malformed_default_topic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"defaultTopicId": "not-a-topic", "defaultTaskId": "task-ok"}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert!(settings.default_topic_id.is_none());
        assert_eq!(settings.default_task_id.as_deref(), Some("task-ok"));
    }

    // ── validate_scope_defaults ─────────────────────────────────────

    #[test]
    fn validate_keeps_well_formed_ids() {
        let mut settings = ClawlinkSettings {
            default_topic_id: Some("topic-infra".to_string()),
            default_task_id: Some("task-rollout-2".to_string()),
            ..ClawlinkSettings::default()
        };
        validate_scope_defaults(&mut settings);
        assert_eq!(settings.default_topic_id.as_deref(), Some("topic-infra"));
        assert_eq!(settings.default_task_id.as_deref(), Some("task-rollout-2"));
    }

    #[test]
    fn validate_rejects_swapped_prefixes() {
        let mut settings = ClawlinkSettings {
            default_topic_id: Some("task-infra".to_string()),
            default_task_id: Some("topic-rollout".to_string()),
            ..ClawlinkSettings::default()
        };
        validate_scope_defaults(&mut settings);
        assert!(settings.default_topic_id.is_none());
        assert!(settings.default_task_id.is_none());
    }

    // ── expand_home ─────────────────────────────────────────────────

    #[test]
    fn expand_home_tilde_prefix() {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        let expanded = expand_home("~/.clawlink/queue.db");
        assert_eq!(expanded, PathBuf::from(home).join(".clawlink/queue.db"));
    }

    #[test]
    fn expand_home_absolute_passthrough() {
        assert_eq!(
            expand_home("/var/lib/clawlink/queue.db"),
            PathBuf::from("/var/lib/clawlink/queue.db")
        );
    }

    #[test]
    fn expand_home_relative_passthrough() {
        assert_eq!(expand_home("queue.db"), PathBuf::from("queue.db"));
    }

    // ── parse_bool ──────────────────────────────────────────────────

    #[test]
    fn parse_bool_true_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "Yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
    }

    #[test]
    fn parse_bool_false_variants() {
        for val in &["false", "0", "no", "off", "FALSE", "No", "OFF"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
    }

    #[test]
    fn parse_bool_invalid() {
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
        assert_eq!(parse_bool("2"), None);
    }

    // ── parse ranges ────────────────────────────────────────────────

    #[test]
    fn parse_u64_valid() {
        assert_eq!(parse_u64_range("4000", 100, 120_000), Some(4_000));
        assert_eq!(parse_u64_range("100", 100, 120_000), Some(100));
    }

    #[test]
    fn parse_u64_out_of_range() {
        assert_eq!(parse_u64_range("50", 100, 120_000), None);
        assert_eq!(parse_u64_range("200000", 100, 120_000), None);
        assert_eq!(parse_u64_range("abc", 100, 120_000), None);
    }

    #[test]
    fn parse_usize_valid() {
        assert_eq!(parse_usize_range("6000", 500, 100_000), Some(6_000));
    }

    #[test]
    fn parse_usize_out_of_range() {
        assert_eq!(parse_usize_range("10", 500, 100_000), None);
    }

    // ── parse_prefix_list ───────────────────────────────────────────

    #[test]
    fn prefix_list_splits_and_trims() {
        assert_eq!(
            parse_prefix_list("clawboard-classifier, cron: ,internal:"),
            vec!["clawboard-classifier", "cron:", "internal:"]
        );
    }

    #[test]
    fn prefix_list_drops_empty_entries() {
        assert_eq!(parse_prefix_list("a:,,b:,"), vec!["a:", "b:"]);
        assert!(parse_prefix_list("").is_empty());
        assert!(parse_prefix_list(" , ").is_empty());
    }
}
