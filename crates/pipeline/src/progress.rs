//! Derived progress and the flat snapshot exposed to consumers.
//!
//! Nothing here is stored: every value is recomputed from the current
//! [`PipelineStateMachine`] and subscription state each time a snapshot is
//! taken.

use serde::Serialize;

use crate::events::FollowupPrompt;
use crate::machine::PipelineStateMachine;
use crate::roster::{Roster, WorkerRecord};
use crate::{CorrelationId, PipelineStatus, Score, SessionId};

/// Percentage of workers in a terminal status, rounded down.
///
/// Non-decreasing within a session because terminal workers never revert.
pub fn progress(roster: &Roster) -> u8 {
    let total = roster.len();
    if total == 0 {
        return 0;
    }
    // terminal <= total, so the result is at most 100.
    ((100 * roster.terminal_count()) / total) as u8
}

/// Point-in-time view of one session, suitable for rendering or serialising.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    pub session_id: Option<SessionId>,
    pub workers: Vec<WorkerRecord>,
    pub pipeline_status: PipelineStatus,
    pub correlation_id: Option<CorrelationId>,
    pub score: Option<Score>,
    pub pipeline_error: Option<String>,
    /// 0–100.
    pub progress: u8,
    /// `true` only while the live subscription is joined.
    pub is_connected: bool,
    /// Events received since the session began, live and reconciliation.
    pub event_count: u64,
    pub last_event_name: Option<String>,
    pub followup: Option<FollowupPrompt>,
}

impl PipelineSnapshot {
    /// `true` when the channel is joined but nothing has arrived yet.
    ///
    /// Kept for longer than a grace period this means the live path is
    /// "joined but silent", and callers should fall back to polling the
    /// system of record. How long the grace period is belongs to the caller.
    pub fn is_silent(&self) -> bool {
        self.is_connected && self.event_count == 0
    }
}

/// Builds a snapshot from the state machine and the current connectivity.
pub fn project(machine: &PipelineStateMachine, is_connected: bool) -> PipelineSnapshot {
    PipelineSnapshot {
        session_id: machine.session().cloned(),
        workers: machine.roster().records().to_vec(),
        pipeline_status: machine.pipeline_status(),
        correlation_id: machine.correlation_id().cloned(),
        score: machine.score(),
        pipeline_error: machine.pipeline_error().map(str::to_string),
        progress: progress(machine.roster()),
        is_connected,
        event_count: machine.event_count(),
        last_event_name: machine.last_event().map(str::to_string),
        followup: machine.followup().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PipelineEvent;
    use crate::roster::RosterDefinition;
    use serde_json::json;

    fn complete(machine: &mut PipelineStateMachine, worker: &str) {
        machine.apply(
            PipelineEvent::decode("agent_completed", &json!({ "worker": worker })).unwrap(),
        );
    }

    #[test]
    fn progress_rounds_down() {
        let mut machine =
            PipelineStateMachine::new(RosterDefinition::from_names(["a", "b", "c"]).unwrap());
        assert_eq!(progress(machine.roster()), 0);
        complete(&mut machine, "a");
        assert_eq!(progress(machine.roster()), 33);
        complete(&mut machine, "b");
        assert_eq!(progress(machine.roster()), 66);
        complete(&mut machine, "c");
        assert_eq!(progress(machine.roster()), 100);
    }

    #[test]
    fn running_workers_do_not_count() {
        let mut machine =
            PipelineStateMachine::new(RosterDefinition::from_names(["a", "b"]).unwrap());
        machine.apply(PipelineEvent::decode("agent_started", &json!({ "worker": "a" })).unwrap());
        assert_eq!(progress(machine.roster()), 0);
    }

    #[test]
    fn silent_only_when_connected_without_events() {
        let mut machine = PipelineStateMachine::new(RosterDefinition::validator());
        assert!(project(&machine, true).is_silent());
        assert!(!project(&machine, false).is_silent());
        complete(&mut machine, "ScoringAgent");
        assert!(!project(&machine, true).is_silent());
    }

    #[test]
    fn snapshot_serialises_camel_case() {
        let machine = PipelineStateMachine::new(RosterDefinition::validator());
        let value = serde_json::to_value(project(&machine, false)).unwrap();
        assert_eq!(value["pipelineStatus"], "running");
        assert_eq!(value["eventCount"], 0);
        assert_eq!(value["workers"][0]["status"], "queued");
    }
}
