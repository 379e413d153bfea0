//! Realtime pipeline status domain.
//!
//! This crate contains every domain concept needed to follow a multi-worker
//! pipeline over a lossy publish/subscribe channel: identifiers, statuses, the
//! typed event union, the worker roster and its state machine, progress
//! projection, the event dispatcher, and the port traits infrastructure must
//! implement.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`SessionId`, `WorkerName`, `Topic`, `ChannelId`, ...) |
//! | [`types`] | Value types (`Score`, `DurationMs`, `Timestamp`) |
//! | [`status`] | `WorkerStatus`, `PipelineStatus`, `SubscriptionState` |
//! | [`events`] | Tagged union of live and reconciliation events |
//! | [`roster`] | Roster definition and per-session worker records |
//! | [`machine`] | `PipelineStateMachine` |
//! | [`progress`] | Progress projection and consumer snapshot |
//! | [`dispatch`] | Name-to-handler `EventDispatcher` |
//! | [`table_changes`] | Typed `INSERT`/`UPDATE`/`DELETE` row subscriptions |
//! | [`ports`] | Transport, authorisation, and system-of-record traits |
//! | [`errors`] | Error types |

pub mod dispatch;
pub mod errors;
pub mod events;
pub mod identifiers;
pub mod machine;
pub mod ports;
pub mod progress;
pub mod roster;
pub mod status;
pub mod table_changes;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use dispatch::{DispatchOutcome, EventDispatcher, Handler};
pub use errors::{AuthError, EventDecodeError, PipelineError, StoreError};
pub use events::{
    ArtifactCreated, FollowupAction, FollowupPrompt, PipelineEvent, PipelineOutcome,
    SessionStatusChange, WorkerPayload,
};
pub use identifiers::{ChannelId, CorrelationId, SessionId, Topic, WorkerName};
pub use machine::{PipelineNotification, PipelineStateMachine};
pub use ports::{
    ArtifactRecord, AuthorizationProvider, ChannelConfig, ChannelHandle, InboundKind,
    InboundMessage, JoinStatus, RealtimeTransport, SystemOfRecord,
};
pub use progress::{progress, project, PipelineSnapshot};
pub use roster::{Roster, RosterDefinition, RosterEntry, WorkerRecord, VALIDATOR_WORKERS};
pub use status::{PipelineStatus, SubscriptionState, WorkerStatus};
pub use table_changes::{table_change_topic, TableChangeHandlers};
pub use types::{DurationMs, Score, Timestamp};
