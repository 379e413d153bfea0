//! Per-session worker roster and aggregate pipeline status.
//!
//! [`PipelineStateMachine`] is the single writer of pipeline state. Both the
//! live event path and the reconciliation path feed it, in receipt order,
//! from one cooperative task; there is no locking because there is no sharing.
//!
//! ## Worker transitions
//!
//! ```text
//! queued  --agent_started-->   running
//! queued|running --agent_completed--> ok
//! queued|running --agent_failed-----> failed
//! ```
//!
//! A completion that arrives before its start is accepted as-is. Once a worker
//! is terminal a late `agent_started` is ignored, while further terminal events
//! overwrite the previous one (last write wins), which absorbs duplicate
//! delivery without raising errors.
//!
//! ## Pipeline transitions
//!
//! The pipeline starts `running` and changes only on an explicit pipeline-level
//! event: `pipeline_complete`, `pipeline_failed`, or the reconciliation event
//! `session_status_changed`. Later events overwrite earlier ones. Completion is
//! never inferred from worker statuses.

use tracing::{debug, info, warn};

use crate::events::{
    ArtifactCreated, FollowupPrompt, PipelineEvent, PipelineOutcome, SessionStatusChange,
    WorkerPayload,
};
use crate::ports::ArtifactRecord;
use crate::roster::{Roster, RosterDefinition};
use crate::{CorrelationId, PipelineStatus, Score, SessionId, WorkerStatus};

/// Observer-facing notification queued by the state machine.
///
/// Drained with [`PipelineStateMachine::take_notifications`] after each
/// mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineNotification {
    /// A `pipeline_complete` event arrived, or polling found a persisted artefact.
    Completed(PipelineOutcome),
    /// A `pipeline_failed` event arrived, or polling found a failed session
    /// without an artefact.
    Failed(PipelineOutcome),
    /// A new follow-up prompt was pushed.
    FollowupReady(FollowupPrompt),
}

/// Worker roster plus aggregate status for one session.
#[derive(Debug, Clone)]
pub struct PipelineStateMachine {
    definition: RosterDefinition,
    session: Option<SessionId>,
    roster: Roster,
    pipeline_status: PipelineStatus,
    correlation_id: Option<CorrelationId>,
    score: Option<Score>,
    pipeline_error: Option<String>,
    followup: Option<FollowupPrompt>,
    event_count: u64,
    last_event: Option<String>,
    notifications: Vec<PipelineNotification>,
}

impl PipelineStateMachine {
    /// Creates a machine with no session observed yet and all state at its
    /// initial values.
    pub fn new(definition: RosterDefinition) -> Self {
        let roster = Roster::new(&definition);
        Self {
            definition,
            session: None,
            roster,
            pipeline_status: PipelineStatus::Running,
            correlation_id: None,
            score: None,
            pipeline_error: None,
            followup: None,
            event_count: 0,
            last_event: None,
            notifications: Vec::new(),
        }
    }

    /// Records the session identity currently being watched.
    ///
    /// When it differs from the previous one the whole state is reset before
    /// anything else happens, so no data from the previous session leaks into
    /// the new one. Returns `true` if a reset took place.
    pub fn observe_session(&mut self, session: Option<SessionId>) -> bool {
        if self.session == session {
            return false;
        }
        debug!(
            previous = ?self.session.as_ref().map(SessionId::as_str),
            next = ?session.as_ref().map(SessionId::as_str),
            "Session changed; resetting pipeline state"
        );
        self.session = session;
        self.reset();
        true
    }

    /// Restores every worker and the pipeline to their initial values while
    /// keeping the observed session.
    pub fn reset(&mut self) {
        self.roster = Roster::new(&self.definition);
        self.pipeline_status = PipelineStatus::Running;
        self.correlation_id = None;
        self.score = None;
        self.pipeline_error = None;
        self.followup = None;
        self.event_count = 0;
        self.last_event = None;
        self.notifications.clear();
    }

    /// Applies one validated event.
    ///
    /// [`PipelineEvent::Unknown`] is ignored and not counted.
    pub fn apply(&mut self, event: PipelineEvent) {
        if let PipelineEvent::Unknown { name } = &event {
            debug!(event = %name, "Ignoring unknown event");
            return;
        }
        self.count(event.name());

        match event {
            PipelineEvent::AgentStarted(p) => self.worker_started(&p),
            PipelineEvent::AgentCompleted(p) => self.worker_finished(p, WorkerStatus::Ok),
            PipelineEvent::AgentFailed(p) => self.worker_finished(p, WorkerStatus::Failed),
            PipelineEvent::PipelineComplete(outcome) => self.pipeline_completed(outcome),
            PipelineEvent::PipelineFailed(outcome) => self.pipeline_failed(outcome),
            PipelineEvent::FollowupReady(prompt) => {
                self.followup = Some(prompt.clone());
                self.notifications
                    .push(PipelineNotification::FollowupReady(prompt));
            }
            PipelineEvent::SessionStatusChanged(change) => self.reconcile_status(&change),
            PipelineEvent::ArtifactCreated(artifact) => self.reconcile_artifact(&artifact),
            PipelineEvent::Unknown { .. } => {}
        }
    }

    /// Counts an event of a known name whose payload failed validation.
    ///
    /// The event was delivered, so it still proves the channel is alive, but
    /// it changes no state.
    pub fn record_malformed(&mut self, name: &str) {
        self.count(name);
    }

    /// Applies the result of polling the system of record directly.
    ///
    /// Polled state is as authoritative as a reconciliation event, but it is
    /// not a delivered event, so it leaves `event_count` untouched.
    pub fn apply_polled(&mut self, status: PipelineStatus, artifact: Option<ArtifactRecord>) {
        info!(status = %status, "Applying polled session status");
        self.pipeline_status = status;

        let outcome = PipelineOutcome {
            status: Some(status.as_str().to_string()),
            correlation_id: artifact.as_ref().map(|a| a.id.clone()),
            score: artifact.as_ref().and_then(|a| a.score),
            duration_ms: None,
            error: None,
            timestamp: None,
        };
        match artifact {
            Some(artifact) => {
                self.correlation_id = Some(artifact.id);
                if artifact.score.is_some() {
                    self.score = artifact.score;
                }
                self.notifications
                    .push(PipelineNotification::Completed(outcome));
            }
            None if status == PipelineStatus::Failed => {
                self.notifications.push(PipelineNotification::Failed(outcome));
            }
            None => {}
        }
    }

    /// Removes and returns queued observer notifications, oldest first.
    pub fn take_notifications(&mut self) -> Vec<PipelineNotification> {
        std::mem::take(&mut self.notifications)
    }

    // -- accessors ----------------------------------------------------------

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn pipeline_status(&self) -> PipelineStatus {
        self.pipeline_status
    }

    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    pub fn score(&self) -> Option<Score> {
        self.score
    }

    /// Error text carried by the last `pipeline_failed` event.
    pub fn pipeline_error(&self) -> Option<&str> {
        self.pipeline_error.as_deref()
    }

    pub fn followup(&self) -> Option<&FollowupPrompt> {
        self.followup.as_ref()
    }

    /// Events received since the current session began.
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn last_event(&self) -> Option<&str> {
        self.last_event.as_deref()
    }

    // -- transitions --------------------------------------------------------

    fn count(&mut self, name: &str) {
        self.event_count += 1;
        self.last_event = Some(name.to_string());
    }

    fn worker_started(&mut self, payload: &WorkerPayload) {
        let Some(record) = self.roster.get_mut(&payload.worker) else {
            debug!(worker = %payload.worker, "Start for worker outside roster");
            return;
        };
        if record.status.is_terminal() {
            debug!(
                worker = %payload.worker,
                status = %record.status,
                "Ignoring start for finished worker"
            );
            return;
        }
        record.status = WorkerStatus::Running;
    }

    fn worker_finished(&mut self, payload: WorkerPayload, status: WorkerStatus) {
        let Some(record) = self.roster.get_mut(&payload.worker) else {
            debug!(worker = %payload.worker, "Result for worker outside roster");
            return;
        };
        debug!(
            worker = %payload.worker,
            from = %record.status,
            to = %status,
            "Worker finished"
        );
        record.status = status;
        match status {
            WorkerStatus::Failed => record.error = payload.error,
            _ => {
                record.duration_ms = payload.duration_ms;
                record.error = None;
            }
        }
    }

    fn pipeline_completed(&mut self, outcome: PipelineOutcome) {
        let status = outcome.completion_status();
        info!(
            status = %status,
            previous = %self.pipeline_status,
            "Pipeline reported finished"
        );
        self.pipeline_status = status;
        if let Some(id) = &outcome.correlation_id {
            self.correlation_id = Some(id.clone());
        }
        if outcome.score.is_some() {
            self.score = outcome.score;
        }
        self.notifications
            .push(PipelineNotification::Completed(outcome));
    }

    fn pipeline_failed(&mut self, outcome: PipelineOutcome) {
        warn!(
            error = outcome.error.as_deref().unwrap_or("unspecified"),
            previous = %self.pipeline_status,
            "Pipeline reported failure"
        );
        self.pipeline_status = PipelineStatus::Failed;
        self.pipeline_error = outcome.error.clone();
        self.notifications.push(PipelineNotification::Failed(outcome));
    }

    fn reconcile_status(&mut self, change: &SessionStatusChange) {
        match PipelineStatus::parse(&change.status) {
            Some(status) => {
                info!(
                    status = %status,
                    previous = %self.pipeline_status,
                    "Reconciled pipeline status from system of record"
                );
                self.pipeline_status = status;
            }
            None => warn!(status = %change.status, "Ignoring unrecognised persisted status"),
        }
    }

    fn reconcile_artifact(&mut self, artifact: &ArtifactCreated) {
        if let Some(id) = &artifact.artifact_id {
            self.correlation_id = Some(id.clone());
        }
        if artifact.score.is_some() {
            self.score = artifact.score;
        }
    }
}
