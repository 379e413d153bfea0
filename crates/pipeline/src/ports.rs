//! Port traits for the external collaborators the core depends on.
//!
//! Infrastructure crates implement these; the domain never sees transport,
//! credential, or storage details.
//!
//! | Trait | Collaborator |
//! |-------|--------------|
//! | [`RealtimeTransport`] | Publish/subscribe transport carrying named events per topic |
//! | [`AuthorizationProvider`] | Refreshes credentials before joining a private topic |
//! | [`SystemOfRecord`] | Persisted store whose row transitions drive reconciliation |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{AuthError, StoreError};
use crate::{ChannelId, CorrelationId, Score, SessionId, Topic};

// ---------------------------------------------------------------------------
// Realtime transport
// ---------------------------------------------------------------------------

/// Transport-level settings for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Whether the topic requires authorisation.
    pub private: bool,
    /// Whether the subscriber receives its own broadcasts.
    pub receive_own: bool,
    /// Whether the transport should acknowledge broadcasts.
    pub ack: bool,
    /// Event names the subscriber has handlers for.
    pub events: Vec<String>,
}

/// A channel object created by the transport for one topic.
///
/// Opening a channel performs no network traffic; joining it does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub id: ChannelId,
    pub topic: Topic,
}

/// Outcome of a join attempt, or a later status change of a joined channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JoinStatus {
    /// The transport acknowledged the subscription.
    Subscribed,
    /// The transport rejected the subscription or the channel broke.
    ChannelError {
        #[serde(default)]
        message: Option<String>,
    },
    /// No acknowledgement arrived in time.
    TimedOut,
    /// The channel was closed.
    Closed,
}

/// Traffic arriving from the transport, tagged with the channel it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub channel: ChannelId,
    pub kind: InboundKind,
}

/// Payload of an [`InboundMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum InboundKind {
    /// A named event with an untyped JSON payload.
    Broadcast { event: String, payload: Value },
    /// A late status notice for the channel.
    Status(JoinStatus),
}

/// Publish/subscribe transport.
///
/// Delivery is at-least-once and FIFO per topic; there is no replay. Inbound
/// messages are delivered out of band (typically over an `mpsc` channel owned
/// by the implementation) and fed back to the subscription manager by its
/// owner.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Creates a channel object for `topic` without contacting the server.
    fn open(&self, topic: &Topic, config: &ChannelConfig) -> ChannelHandle;

    /// Issues the join request and waits for its outcome.
    async fn join(&self, channel: &ChannelHandle) -> JoinStatus;

    /// Leaves and discards the channel. Must tolerate channels that never joined.
    async fn leave(&self, channel: &ChannelHandle);
}

// ---------------------------------------------------------------------------
// Authorisation
// ---------------------------------------------------------------------------

/// Refreshes the credentials the transport presents when joining private topics.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    /// Must complete before a join request for a private topic is sent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when credentials cannot be refreshed.
    async fn refresh(&self) -> Result<(), AuthError>;
}

// ---------------------------------------------------------------------------
// System of record
// ---------------------------------------------------------------------------

/// The persisted artefact produced by a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: CorrelationId,
    #[serde(default)]
    pub score: Option<Score>,
}

/// Persisted store that is the source of truth for pipeline outcomes.
#[async_trait]
pub trait SystemOfRecord: Send + Sync {
    /// Returns the persisted status string of a session, if the session exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be queried.
    async fn session_status(&self, session: &SessionId) -> Result<Option<String>, StoreError>;

    /// Returns the most recently created artefact for a session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be queried.
    async fn latest_artifact(
        &self,
        session: &SessionId,
    ) -> Result<Option<ArtifactRecord>, StoreError>;
}
