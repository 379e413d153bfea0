//! Typed events received on a pipeline topic.
//!
//! Publishers send named events with loosely-typed JSON payloads. Every payload
//! is validated here, at the dispatch boundary, and turned into a
//! [`PipelineEvent`] variant. Names this crate does not know about become
//! [`PipelineEvent::Unknown`] so that newer publishers do not break older
//! consumers. Terminal pipeline events are the exception to strict validation:
//! their outcome fields are optional extras and are dropped when mistyped.
//!
//! Two families share one topic:
//!
//! | Family | Events |
//! |--------|--------|
//! | Live progress | `agent_started`, `agent_completed`, `agent_failed`, `pipeline_complete`, `pipeline_failed`, `followup_ready` |
//! | Reconciliation | `session_status_changed`, `artifact_created` (alias `report_created`) |
//!
//! Reconciliation events are emitted by the system of record whenever a
//! persisted row changes, and are authoritative.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EventDecodeError;
use crate::{CorrelationId, DurationMs, PipelineStatus, Score, SessionId, Timestamp, WorkerName};

/// Wire names of every event this crate understands.
pub mod names {
    pub const AGENT_STARTED: &str = "agent_started";
    pub const AGENT_COMPLETED: &str = "agent_completed";
    pub const AGENT_FAILED: &str = "agent_failed";
    pub const PIPELINE_COMPLETE: &str = "pipeline_complete";
    pub const PIPELINE_FAILED: &str = "pipeline_failed";
    pub const FOLLOWUP_READY: &str = "followup_ready";
    pub const SESSION_STATUS_CHANGED: &str = "session_status_changed";
    pub const ARTIFACT_CREATED: &str = "artifact_created";
    /// Older publishers name the artefact event after the report table.
    pub const REPORT_CREATED: &str = "report_created";

    /// All names, in the order handlers are registered.
    pub const ALL: &[&str] = &[
        AGENT_STARTED,
        AGENT_COMPLETED,
        AGENT_FAILED,
        PIPELINE_COMPLETE,
        PIPELINE_FAILED,
        FOLLOWUP_READY,
        SESSION_STATUS_CHANGED,
        ARTIFACT_CREATED,
        REPORT_CREATED,
    ];
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload shared by `agent_started`, `agent_completed` and `agent_failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPayload {
    /// The worker the event is about.
    #[serde(alias = "agent")]
    pub worker: WorkerName,
    /// Publisher's 1-based step number, informational only.
    #[serde(default)]
    pub step: Option<u32>,
    /// Publisher's total step count, informational only.
    #[serde(default)]
    pub total_steps: Option<u32>,
    /// Reported duration; set on completion.
    #[serde(default)]
    pub duration_ms: Option<DurationMs>,
    /// Failure description; set on failure.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Payload of `pipeline_complete` and `pipeline_failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    /// `complete`, `partial` or `failed` as reported by the publisher.
    #[serde(default)]
    pub status: Option<String>,
    /// Identifier of the produced artefact.
    #[serde(default, alias = "reportId")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub score: Option<Score>,
    #[serde(default)]
    pub duration_ms: Option<DurationMs>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

impl PipelineOutcome {
    /// Reads an outcome from any payload, never failing.
    ///
    /// A terminal pipeline event is a fact regardless of what accompanies it,
    /// so each field is read on its own and dropped when missing or mistyped.
    /// A payload that is not an object yields an empty outcome.
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            status: field(payload, &["status"]),
            correlation_id: field(payload, &["correlationId", "reportId"]),
            score: field(payload, &["score"]),
            duration_ms: field(payload, &["durationMs"]),
            error: field(payload, &["error"]),
            timestamp: field(payload, &["timestamp"]),
        }
    }

    /// Terminal status carried by a `pipeline_complete` event.
    ///
    /// `failed` and `partial` are honoured; anything else, including a missing
    /// status, means the pipeline completed.
    pub fn completion_status(&self) -> PipelineStatus {
        match self.status.as_deref() {
            Some("failed") => PipelineStatus::Failed,
            Some("partial") => PipelineStatus::Partial,
            _ => PipelineStatus::Complete,
        }
    }
}

/// Payload of `session_status_changed`, emitted when the persisted session row
/// changes status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusChange {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Raw persisted status. Values outside [`PipelineStatus`] are ignored.
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// Payload of `artifact_created`, emitted when the pipeline's output row is
/// inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactCreated {
    #[serde(default, alias = "reportId")]
    pub artifact_id: Option<CorrelationId>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default, alias = "overallScore")]
    pub score: Option<Score>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// What a follow-up prompt asks of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupAction {
    /// Another question should be put to the user.
    Ask,
    /// Enough information has been gathered to start the pipeline.
    Ready,
}

/// Payload of `followup_ready`: the next interview question pushed to the
/// consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowupPrompt {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub action: FollowupAction,
    #[serde(default)]
    pub question: String,
    /// Coverage level per interview topic.
    #[serde(default)]
    pub coverage: BTreeMap<String, String>,
    #[serde(default)]
    pub question_number: u32,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

/// First of `keys` present in `payload` that decodes as `T`.
fn field<T: DeserializeOwned>(payload: &Value, keys: &[&str]) -> Option<T> {
    keys.iter()
        .filter_map(|key| payload.get(*key))
        .find_map(|value| T::deserialize(value).ok())
}

// ---------------------------------------------------------------------------
// Tagged union
// ---------------------------------------------------------------------------

/// One event received on a pipeline topic, validated.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    AgentStarted(WorkerPayload),
    AgentCompleted(WorkerPayload),
    AgentFailed(WorkerPayload),
    PipelineComplete(PipelineOutcome),
    PipelineFailed(PipelineOutcome),
    FollowupReady(FollowupPrompt),
    /// Reconciliation: the persisted session status changed.
    SessionStatusChanged(SessionStatusChange),
    /// Reconciliation: the pipeline's artefact was persisted.
    ArtifactCreated(ArtifactCreated),
    /// An event name this crate does not recognise. Carried for logging only.
    Unknown {
        /// The unrecognised event name.
        name: String,
    },
}

impl PipelineEvent {
    /// Validates a named payload and returns the matching variant.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError`] when `name` is a known event but `payload`
    /// does not match its contract. Unknown names never fail, and neither do
    /// `pipeline_complete` / `pipeline_failed` (see
    /// [`PipelineOutcome::from_payload`]).
    pub fn decode(name: &str, payload: &Value) -> Result<Self, EventDecodeError> {
        fn parse<'a, T: Deserialize<'a>>(
            name: &str,
            payload: &'a Value,
        ) -> Result<T, EventDecodeError> {
            T::deserialize(payload).map_err(|source| EventDecodeError {
                event: name.to_string(),
                source,
            })
        }

        let event = match name {
            names::AGENT_STARTED => Self::AgentStarted(parse(name, payload)?),
            names::AGENT_COMPLETED => Self::AgentCompleted(parse(name, payload)?),
            names::AGENT_FAILED => Self::AgentFailed(parse(name, payload)?),
            names::PIPELINE_COMPLETE => {
                Self::PipelineComplete(PipelineOutcome::from_payload(payload))
            }
            names::PIPELINE_FAILED => Self::PipelineFailed(PipelineOutcome::from_payload(payload)),
            names::FOLLOWUP_READY => Self::FollowupReady(parse(name, payload)?),
            names::SESSION_STATUS_CHANGED => Self::SessionStatusChanged(parse(name, payload)?),
            names::ARTIFACT_CREATED | names::REPORT_CREATED => {
                Self::ArtifactCreated(parse(name, payload)?)
            }
            other => Self::Unknown {
                name: other.to_string(),
            },
        };
        Ok(event)
    }

    /// Canonical wire name of this event.
    pub fn name(&self) -> &str {
        match self {
            Self::AgentStarted(_) => names::AGENT_STARTED,
            Self::AgentCompleted(_) => names::AGENT_COMPLETED,
            Self::AgentFailed(_) => names::AGENT_FAILED,
            Self::PipelineComplete(_) => names::PIPELINE_COMPLETE,
            Self::PipelineFailed(_) => names::PIPELINE_FAILED,
            Self::FollowupReady(_) => names::FOLLOWUP_READY,
            Self::SessionStatusChanged(_) => names::SESSION_STATUS_CHANGED,
            Self::ArtifactCreated(_) => names::ARTIFACT_CREATED,
            Self::Unknown { name } => name,
        }
    }

    /// Returns `true` for events sourced from the system of record.
    pub fn is_reconciliation(&self) -> bool {
        matches!(self, Self::SessionStatusChanged(_) | Self::ArtifactCreated(_))
    }
}
