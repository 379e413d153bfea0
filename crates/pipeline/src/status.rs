//! Status enumerations for workers, the aggregate pipeline, and channel
//! subscriptions.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Worker status
// ---------------------------------------------------------------------------

/// Progress of a single worker within a roster.
///
/// `Queued` is the initial value. `Ok`, `Partial`, `Failed` and `Skipped` are
/// terminal: once a worker reaches one of them it never goes back to
/// `Queued` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Scheduled but not yet started.
    Queued,
    /// Reported as started.
    Running,
    /// Completed successfully.
    Ok,
    /// Completed with a degraded result.
    Partial,
    /// Reported as failed.
    Failed,
    /// Never scheduled for this session. Only assignable when the roster is created.
    Skipped,
}

impl WorkerStatus {
    /// Returns `true` for statuses from which no further transition is expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ok | Self::Partial | Self::Failed | Self::Skipped)
    }

    /// Returns the snake_case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Pipeline status
// ---------------------------------------------------------------------------

/// Aggregate status of one pipeline run.
///
/// `Running` is the initial and only non-terminal value. The status only ever
/// changes in response to an explicit pipeline-level event; it is never
/// inferred from worker statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Still in progress.
    Running,
    /// Finished with all workers succeeding.
    Complete,
    /// Finished with a usable but incomplete result.
    Partial,
    /// Finished without a usable result.
    Failed,
}

impl PipelineStatus {
    /// Returns `true` for every status other than [`PipelineStatus::Running`].
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Parses a persisted status string.
    ///
    /// Returns `None` for anything outside the four known values; callers
    /// ignore such statuses rather than guessing.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "complete" => Some(Self::Complete),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns the snake_case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Subscription state
// ---------------------------------------------------------------------------

/// Lifecycle of one topic subscription held by a subscription manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// No subscription has been requested, or the last one was torn down.
    Idle,
    /// A join request has been issued and no outcome has arrived yet.
    Joining,
    /// The transport acknowledged the join.
    Joined,
    /// The join or authorisation failed; see the manager's error message.
    Errored,
    /// The join was not acknowledged in time.
    TimedOut,
    /// The transport closed the channel.
    Closed,
}

impl SubscriptionState {
    /// Returns `true` while a subscription is live or about to become live.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Joining | Self::Joined)
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Joining => "joining",
            Self::Joined => "joined",
            Self::Errored => "errored",
            Self::TimedOut => "timed_out",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_worker_statuses() {
        assert!(!WorkerStatus::Queued.is_terminal());
        assert!(!WorkerStatus::Running.is_terminal());
        for status in [
            WorkerStatus::Ok,
            WorkerStatus::Partial,
            WorkerStatus::Failed,
            WorkerStatus::Skipped,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn pipeline_status_parse_rejects_unknown_values() {
        assert_eq!(PipelineStatus::parse("partial"), Some(PipelineStatus::Partial));
        assert_eq!(PipelineStatus::parse("done"), None);
        assert_eq!(PipelineStatus::parse("FAILED"), None);
    }

    #[test]
    fn statuses_serialise_as_snake_case() {
        let json = serde_json::to_string(&SubscriptionState::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        let json = serde_json::to_string(&WorkerStatus::Ok).unwrap();
        assert_eq!(json, "\"ok\"");
    }
}
