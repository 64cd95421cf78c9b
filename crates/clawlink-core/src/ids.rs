//! Branded ID newtypes for the relay's vocabulary.
//!
//! Opaque transport identifiers (`MessageId`, `RequestId`, `QueueEntryId`)
//! are newtype wrappers around `String` so a message id can never be passed
//! where a request id is expected. Board entity ids (`TopicId`, `TaskId`)
//! additionally carry the board's entity grammar: a `topic-`/`task-` prefix
//! followed by an alphanumeric slug. [`TopicId::parse`] and [`TaskId::parse`]
//! are total — malformed input yields `None`, never a panic.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

/// Grammar shared by board entity ids: prefix, a leading alphanumeric, then
/// up to 200 more alphanumerics or dashes. Single-character slugs such as
/// `topic-1` are legal.
static ENTITY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(topic|task)-[A-Za-z0-9][A-Za-z0-9-]{0,200}$").unwrap());

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! board_entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Parse a candidate id against the board entity grammar.
            ///
            /// Returns `None` unless the value carries the expected prefix
            /// and matches the full grammar.
            #[must_use]
            pub fn parse(s: &str) -> Option<Self> {
                (s.starts_with(concat!($prefix, "-")) && ENTITY_ID_RE.is_match(s))
                    .then(|| Self(s.to_owned()))
            }

            /// Wrap a value that is already known to be well-formed
            /// (e.g. returned by the board service).
            #[must_use]
            pub fn from_trusted(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Transport-level message identifier, as assigned by the provider.
    MessageId
}

branded_id! {
    /// Identifier of an originating board request, propagated across a
    /// session's capture scope.
    RequestId
}

branded_id! {
    /// Unique identifier for a durable queue entry.
    QueueEntryId
}

board_entity_id! {
    /// Identifier of a board topic (`topic-` prefixed slug).
    TopicId, "topic"
}

board_entity_id! {
    /// Identifier of a board task (`task-` prefixed slug).
    TaskId, "task"
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
