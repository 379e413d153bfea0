//! Error types for the pipeline status domain.
//!
//! Transport-level failures are deliberately absent from this module: a
//! channel that errors, times out, or closes is represented as
//! [`crate::SubscriptionState`] plus an error message, never as an `Err`.
//! The types here cover configuration problems, payloads that cannot be
//! decoded, and failures reported by the external collaborators behind
//! [`crate::ports`].

use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors raised while building domain objects from configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// A roster lists the same worker name more than once.
    #[error("Worker '{name}' appears more than once in the roster")]
    DuplicateWorker {
        /// The repeated worker name.
        name: String,
    },

    /// A roster entry has an empty name.
    #[error("Roster entry {position} has an empty worker name")]
    EmptyWorkerName {
        /// 1-based position of the offending entry.
        position: usize,
    },

    /// A roster has no workers at all.
    #[error("Roster must contain at least one worker")]
    EmptyRoster,
}

// ---------------------------------------------------------------------------
// Event decoding
// ---------------------------------------------------------------------------

/// A payload for a known event name did not match that event's contract.
///
/// Unknown event *names* are not an error; they decode to
/// [`crate::PipelineEvent::Unknown`].
#[derive(Debug, Error)]
#[error("Malformed '{event}' payload: {source}")]
pub struct EventDecodeError {
    /// The event name whose payload failed to decode.
    pub event: String,
    /// The underlying deserialisation failure.
    #[source]
    pub source: serde_json::Error,
}

// ---------------------------------------------------------------------------
// Collaborator errors
// ---------------------------------------------------------------------------

/// The authorisation provider could not refresh credentials.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Authorization refresh failed: {message}")]
pub struct AuthError {
    /// Human-readable failure description from the provider.
    pub message: String,
}

impl AuthError {
    /// Creates an [`AuthError`] from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The system of record could not be queried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store was reachable but rejected or failed the query.
    #[error("System of record query failed: {message}")]
    Query {
        /// Description of the failure.
        message: String,
    },

    /// The store could not be reached.
    #[error("System of record unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}
