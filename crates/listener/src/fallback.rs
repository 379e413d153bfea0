//! Direct polling of the system of record when the live channel is silent.
//!
//! Reconciliation events already arrive on the pipeline topic whenever a
//! persisted row changes, but they ride the same transport as live events. If
//! that transport never delivers anything, the only remaining source of truth
//! is the store itself. [`PollingFallback`] decides when to ask it and turns a
//! terminal persisted status into a [`PolledOutcome`].

use std::sync::Arc;
use std::time::Duration;

use pipeline::{ArtifactRecord, PipelineSnapshot, PipelineStatus, SessionId, SystemOfRecord};
use tracing::{debug, warn};

use crate::config::FallbackConfig;

/// Terminal state found in the system of record.
#[derive(Debug, Clone, PartialEq)]
pub struct PolledOutcome {
    pub status: PipelineStatus,
    pub artifact: Option<ArtifactRecord>,
}

/// Polls the system of record for sessions whose live channel stays silent.
pub struct PollingFallback {
    store: Arc<dyn SystemOfRecord>,
    config: FallbackConfig,
}

impl PollingFallback {
    pub fn new(store: Arc<dyn SystemOfRecord>, config: FallbackConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Whether a poll is due.
    ///
    /// Polling runs while a session is being watched, its pipeline is still
    /// `running`, no event has arrived, and at least `silence_threshold` has
    /// passed since the session began. Connectivity is deliberately not
    /// consulted: a joined-but-silent channel and a broken one are treated alike.
    pub fn should_poll(&self, snapshot: &PipelineSnapshot, since_session_start: Duration) -> bool {
        snapshot.session_id.is_some()
            && snapshot.pipeline_status == PipelineStatus::Running
            && snapshot.event_count == 0
            && since_session_start >= self.config.silence_threshold()
    }

    /// Queries the store once.
    ///
    /// Returns `Some` only when the persisted status is terminal. The latest
    /// artefact is looked up for every terminal status, `failed` included,
    /// since a session can persist an artefact before its status flips. Store
    /// errors are logged and reported as `None`; the next tick tries again.
    pub async fn poll(&self, session: &SessionId) -> Option<PolledOutcome> {
        let raw = match self.store.session_status(session).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(session = %session, "Session not yet persisted");
                return None;
            }
            Err(err) => {
                warn!(session = %session, error = %err, "Polling session status failed");
                return None;
            }
        };
        let status = match PipelineStatus::parse(&raw) {
            Some(status) if status.is_terminal() => status,
            _ => {
                debug!(session = %session, status = %raw, "Persisted session not finished");
                return None;
            }
        };
        let artifact = match self.store.latest_artifact(session).await {
            Ok(artifact) => artifact,
            Err(err) => {
                warn!(session = %session, error = %err, "Polling latest artifact failed");
                None
            }
        };
        Some(PolledOutcome { status, artifact })
    }
}
