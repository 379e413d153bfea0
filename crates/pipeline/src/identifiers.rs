//! Newtype domain identifiers.
//!
//! Every concept that has an identity is represented as a distinct newtype
//! wrapping a primitive, so a [`WorkerName`] cannot be passed where a
//! [`SessionId`] is expected even though both are strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
                    .ok_or_else(|| format!("{} must not be empty", stringify!($name)))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed (externally assigned)
// ---------------------------------------------------------------------------

string_id! {
    /// External correlation id scoping one roster + pipeline status instance.
    ///
    /// Changing the observed session forces the state machine to reinitialise.
    SessionId
}

string_id! {
    /// Name of one worker in a roster (e.g. `"ScoringAgent"`).
    ///
    /// Unique within a roster.
    WorkerName
}

string_id! {
    /// Identifier of the artefact a pipeline produced (e.g. a report row id).
    CorrelationId
}

string_id! {
    /// Name of a publish/subscribe topic.
    ///
    /// Convention: `{scope}:{entityId}:{type}`, or `{scope}:{entityId}` for
    /// session-scoped topics. Uniqueness per bounded context is the caller's
    /// responsibility; collisions are not detected here.
    Topic
}

impl Topic {
    /// Builds a `{scope}:{entity_id}:{kind}` topic.
    ///
    /// Returns `None` if any segment is empty.
    pub fn for_entity(scope: &str, entity_id: &str, kind: &str) -> Option<Self> {
        if scope.is_empty() || entity_id.is_empty() || kind.is_empty() {
            return None;
        }
        Self::new(format!("{scope}:{entity_id}:{kind}"))
    }

    /// Builds a `{scope}:{session}` topic, e.g. `validator:{sessionId}`.
    pub fn for_session(scope: &str, session: &SessionId) -> Option<Self> {
        if scope.is_empty() {
            return None;
        }
        Self::new(format!("{scope}:{session}"))
    }
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identity of one transport channel object.
///
/// A fresh id is minted every time a channel is opened, even for a topic that
/// was used before. Join confirmations and status notices carry the id of the
/// channel they belong to, so a notice for a torn-down channel can be told
/// apart from one for its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Generates a new random channel identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a [`ChannelId`] from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifiers_are_rejected() {
        assert!(SessionId::new("").is_none());
        assert!(WorkerName::new("").is_none());
        assert_eq!(SessionId::new("s-1").unwrap().as_str(), "s-1");
    }

    #[test]
    fn entity_topic_uses_three_segments() {
        let topic = Topic::for_entity("tasks", "abc-123", "changes").unwrap();
        assert_eq!(topic.as_str(), "tasks:abc-123:changes");
        assert!(Topic::for_entity("tasks", "", "changes").is_none());
    }

    #[test]
    fn session_topic_uses_scope_prefix() {
        let session = SessionId::new("42").unwrap();
        let topic = Topic::for_session("validator", &session).unwrap();
        assert_eq!(topic.to_string(), "validator:42");
    }

    #[test]
    fn deserialising_an_empty_name_fails() {
        let result: Result<WorkerName, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
        let name: WorkerName = serde_json::from_str("\"MVPAgent\"").unwrap();
        assert_eq!(name.as_str(), "MVPAgent");
    }

    #[test]
    fn channel_ids_are_distinct() {
        assert_ne!(ChannelId::new_random(), ChannelId::new_random());
    }
}
