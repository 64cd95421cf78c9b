//! Board-scope routes parsed from session keys.
//!
//! A session key of the form `clawboard:topic:<topicId>` or
//! `clawboard:task:<topicId>:<taskId>` pins captured traffic to a specific
//! board entity. Parsing is total: anything that deviates from the grammar
//! (wrong arity, bad entity ids, foreign prefixes) is simply not a board
//! route.

use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, TopicId};

/// A session key's board scope, when it has one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BoardRoute {
    /// Scoped to a whole topic.
    #[serde(rename_all = "camelCase")]
    Topic {
        /// The topic this session writes to.
        topic_id: TopicId,
    },
    /// Scoped to a single task within a topic.
    #[serde(rename_all = "camelCase")]
    Task {
        /// The task's parent topic.
        topic_id: TopicId,
        /// The task this session writes to.
        task_id: TaskId,
    },
}

impl BoardRoute {
    /// Parse a session key into a board route.
    ///
    /// A trailing `|thread:...` qualifier is ignored; the remaining key must
    /// be exactly `clawboard:topic:<topicId>` (three segments) or
    /// `clawboard:task:<topicId>:<taskId>` (four segments), with both entity
    /// ids passing the board grammar. Returns `None` on any deviation.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let base = key.split_once('|').map_or(key, |(head, _)| head);
        let segments: Vec<&str> = base.split(':').collect();
        if segments.first() != Some(&"clawboard") {
            return None;
        }
        match (segments.get(1), segments.len()) {
            (Some(&"topic"), 3) => {
                let topic_id = TopicId::parse(segments[2])?;
                Some(Self::Topic { topic_id })
            }
            (Some(&"task"), 4) => {
                let topic_id = TopicId::parse(segments[2])?;
                let task_id = TaskId::parse(segments[3])?;
                Some(Self::Task { topic_id, task_id })
            }
            _ => None,
        }
    }

    /// The topic this route points at.
    #[must_use]
    pub fn topic_id(&self) -> &TopicId {
        match self {
            Self::Topic { topic_id } | Self::Task { topic_id, .. } => topic_id,
        }
    }

    /// The task this route points at, for task routes.
    #[must_use]
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::Topic { .. } => None,
            Self::Task { task_id, .. } => Some(task_id),
        }
    }

    /// Render the canonical session key for this route.
    #[must_use]
    pub fn to_session_key(&self) -> String {
        match self {
            Self::Topic { topic_id } => format!("clawboard:topic:{topic_id}"),
            Self::Task { topic_id, task_id } => {
                format!("clawboard:task:{topic_id}:{task_id}")
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
