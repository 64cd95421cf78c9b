//! Board-scope resolution support.
//!
//! A payload's scope says which board topic and task it lands under and
//! which board request set the work in motion. The resolution itself lives
//! on the capture agent, because it consults live state; the types and the
//! pure helpers live here.

use serde_json::Value;

use clawlink_core::short_digest;

/// Resolved board scope for one outbound payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedScope {
    /// Board topic the payload belongs to.
    pub topic_id: Option<String>,
    /// Board task the payload belongs to.
    pub task_id: Option<String>,
    /// Board request that originated the work.
    pub request_id: Option<String>,
    /// True when the scope came from spawn linkage or a board lookup rather
    /// than the event's own session key.
    pub inherited: bool,
}

impl ResolvedScope {
    /// Whether no scope component was resolved at all.
    #[must_use]
    pub fn is_unscoped(&self) -> bool {
        self.topic_id.is_none() && self.task_id.is_none() && self.request_id.is_none()
    }
}

/// Field names that may carry a spawned child's session key.
const CHILD_KEY_FIELDS: &[&str] = &["sessionKey", "childSessionKey", "agentSessionKey"];

/// Search depth for child-key extraction.
const CHILD_KEY_MAX_DEPTH: usize = 3;

/// Pull a child session key out of a spawn tool result.
///
/// Spawn tools report the session key of the agent they started somewhere
/// in their result. The search is shallow and name-driven: any of the known
/// field names holding a non-empty string, up to a few levels deep, breadth
/// irrelevant, first hit wins.
#[must_use]
pub fn extract_child_session_key(result: &Value) -> Option<String> {
    extract_at_depth(result, 0)
}

fn extract_at_depth(value: &Value, depth: usize) -> Option<String> {
    if depth > CHILD_KEY_MAX_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            for field in CHILD_KEY_FIELDS {
                if let Some(Value::String(key)) = map.get(*field) {
                    let trimmed = key.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_owned());
                    }
                }
            }
            map.values()
                .find_map(|inner| extract_at_depth(inner, depth + 1))
        }
        Value::Array(items) => items
            .iter()
            .find_map(|item| extract_at_depth(item, depth + 1)),
        _ => None,
    }
}

/// Correlation key linking a `beforeToolCall` to its `afterToolCall`.
///
/// The run id identifies the pair when the runtime provides one; otherwise
/// the tool name plus a digest of the parameters stands in. Parameter
/// serialization is deterministic (object keys are sorted), so both hooks
/// derive the same key from the same call.
#[must_use]
pub fn spawn_correlation_key(run_id: Option<&str>, tool_name: &str, params: &Value) -> String {
    if let Some(id) = run_id.map(str::trim).filter(|s| !s.is_empty()) {
        return format!("run:{id}");
    }
    format!("tool:{tool_name}:{}", short_digest(&params.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_top_level_session_key() {
        let result = json!({"sessionKey": "agent:sub:run-42", "status": "started"});
        assert_eq!(
            extract_child_session_key(&result).as_deref(),
            Some("agent:sub:run-42")
        );
    }

    #[test]
    fn extracts_nested_and_array_keys() {
        let result = json!({"spawn": {"childSessionKey": "agent:sub:run-1"}});
        assert_eq!(
            extract_child_session_key(&result).as_deref(),
            Some("agent:sub:run-1")
        );

        let result = json!({"agents": [{"agentSessionKey": "agent:sub:run-2"}]});
        assert_eq!(
            extract_child_session_key(&result).as_deref(),
            Some("agent:sub:run-2")
        );
    }

    #[test]
    fn ignores_empty_and_non_string_values() {
        assert!(extract_child_session_key(&json!({"sessionKey": "  "})).is_none());
        assert!(extract_child_session_key(&json!({"sessionKey": 42})).is_none());
        assert!(extract_child_session_key(&json!("agent:sub:run-1")).is_none());
    }

    #[test]
    fn search_is_depth_limited() {
        let deep = json!({"a": {"b": {"c": {"d": {"sessionKey": "agent:sub:run-9"}}}}});
        assert!(extract_child_session_key(&deep).is_none());

        let shallow = json!({"a": {"b": {"sessionKey": "agent:sub:run-9"}}});
        assert_eq!(
            extract_child_session_key(&shallow).as_deref(),
            Some("agent:sub:run-9")
        );
    }

    #[test]
    fn run_id_dominates_correlation() {
        let params = json!({"task": "summarize"});
        assert_eq!(
            spawn_correlation_key(Some("r-9"), "sessions_spawn", &params),
            "run:r-9"
        );
        assert_eq!(
            spawn_correlation_key(Some("  "), "sessions_spawn", &params),
            spawn_correlation_key(None, "sessions_spawn", &params)
        );
    }

    #[test]
    fn fingerprint_correlation_is_stable_and_distinguishes_params() {
        let a = json!({"task": "summarize", "depth": 2});
        let b = json!({"task": "summarize", "depth": 3});
        let key_a = spawn_correlation_key(None, "sessions_spawn", &a);
        assert_eq!(key_a, spawn_correlation_key(None, "sessions_spawn", &a));
        assert_ne!(key_a, spawn_correlation_key(None, "sessions_spawn", &b));
        assert_ne!(key_a, spawn_correlation_key(None, "other_tool", &a));
    }

    #[test]
    fn unscoped_detection() {
        assert!(ResolvedScope::default().is_unscoped());
        let scoped = ResolvedScope {
            request_id: Some("req-1".to_owned()),
            ..ResolvedScope::default()
        };
        assert!(!scoped.is_unscoped());
    }
}
