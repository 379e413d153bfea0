//! The fixed, ordered set of workers tracked for one session.
//!
//! A [`RosterDefinition`] is configuration: which workers exist, in which
//! order, and whether any of them start out `skipped`. A [`Roster`] is the
//! per-session state created from it. Records are never added or removed after
//! creation, only mutated.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::{DurationMs, WorkerName, WorkerStatus};

/// Worker names of the default validation pipeline, in execution order.
pub const VALIDATOR_WORKERS: [&str; 7] = [
    "ExtractorAgent",
    "ResearchAgent",
    "CompetitorAgent",
    "ScoringAgent",
    "MVPAgent",
    "ComposerAgent",
    "VerifierAgent",
];

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// One configured roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: WorkerName,
    /// When `true` the worker is never scheduled and starts out `skipped`.
    #[serde(default)]
    pub skipped: bool,
}

/// Validated, ordered list of worker names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RosterDefinition {
    entries: Vec<RosterEntry>,
}

impl RosterDefinition {
    /// Builds a definition from entries, rejecting duplicates and empty rosters.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyRoster`] or [`PipelineError::DuplicateWorker`].
    pub fn new(entries: Vec<RosterEntry>) -> Result<Self, PipelineError> {
        if entries.is_empty() {
            return Err(PipelineError::EmptyRoster);
        }
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(PipelineError::DuplicateWorker {
                    name: entry.name.to_string(),
                });
            }
        }
        Ok(Self { entries })
    }

    /// Builds a definition in which every worker starts out `queued`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyWorkerName`] for empty names, plus the
    /// errors of [`RosterDefinition::new`].
    pub fn from_names<I, S>(names: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                WorkerName::new(name)
                    .map(|name| RosterEntry {
                        name,
                        skipped: false,
                    })
                    .ok_or(PipelineError::EmptyWorkerName { position: i + 1 })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    /// The seven-worker roster of the validation pipeline.
    pub fn validator() -> Self {
        let entries = VALIDATOR_WORKERS
            .iter()
            .filter_map(|name| WorkerName::new(*name))
            .map(|name| RosterEntry {
                name,
                skipped: false,
            })
            .collect();
        Self { entries }
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false` for a validated definition.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in roster order.
    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }
}

impl<'de> Deserialize<'de> for RosterDefinition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let entries = Vec::<RosterEntry>::deserialize(deserializer)?;
        Self::new(entries).map_err(serde::de::Error::custom)
    }
}

impl Default for RosterDefinition {
    fn default() -> Self {
        Self::validator()
    }
}

// ---------------------------------------------------------------------------
// Per-session state
// ---------------------------------------------------------------------------

/// Status of one worker within the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub name: WorkerName,
    /// 1-based position within the roster.
    pub ordinal: usize,
    pub status: WorkerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<DurationMs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Worker records for one session, in roster order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    records: Vec<WorkerRecord>,
}

impl Roster {
    /// Creates the initial per-session state: every worker `queued`, except
    /// those configured as skipped.
    pub fn new(definition: &RosterDefinition) -> Self {
        let records = definition
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| WorkerRecord {
                name: entry.name.clone(),
                ordinal: i + 1,
                status: if entry.skipped {
                    WorkerStatus::Skipped
                } else {
                    WorkerStatus::Queued
                },
                duration_ms: None,
                error: None,
            })
            .collect();
        Self { records }
    }

    /// Records in roster order.
    pub fn records(&self) -> &[WorkerRecord] {
        &self.records
    }

    /// Looks up a worker by name.
    pub fn get(&self, name: &WorkerName) -> Option<&WorkerRecord> {
        self.records.iter().find(|r| &r.name == name)
    }

    pub(crate) fn get_mut(&mut self, name: &WorkerName) -> Option<&mut WorkerRecord> {
        self.records.iter_mut().find(|r| &r.name == name)
    }

    /// Number of workers in the roster.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of workers in a terminal status.
    pub fn terminal_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status.is_terminal())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_roster_has_seven_ordered_workers() {
        let roster = Roster::new(&RosterDefinition::validator());
        assert_eq!(roster.len(), 7);
        assert_eq!(roster.records()[0].name.as_str(), "ExtractorAgent");
        assert_eq!(roster.records()[6].ordinal, 7);
        assert!(roster
            .records()
            .iter()
            .all(|r| r.status == WorkerStatus::Queued));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = RosterDefinition::from_names(["a", "b", "a"]).unwrap_err();
        assert_eq!(err, PipelineError::DuplicateWorker { name: "a".into() });
    }

    #[test]
    fn empty_names_and_rosters_are_rejected() {
        assert_eq!(
            RosterDefinition::from_names(["a", ""]).unwrap_err(),
            PipelineError::EmptyWorkerName { position: 2 }
        );
        assert_eq!(
            RosterDefinition::from_names(Vec::<String>::new()).unwrap_err(),
            PipelineError::EmptyRoster
        );
    }

    #[test]
    fn skipped_entries_start_terminal() {
        let definition: RosterDefinition = serde_json::from_str(
            r#"[{"name":"a"},{"name":"b","skipped":true}]"#,
        )
        .unwrap();
        let roster = Roster::new(&definition);
        assert_eq!(roster.records()[1].status, WorkerStatus::Skipped);
        assert_eq!(roster.terminal_count(), 1);
    }

    #[test]
    fn deserialising_duplicates_fails() {
        let result: Result<RosterDefinition, _> =
            serde_json::from_str(r#"[{"name":"a"},{"name":"a"}]"#);
        assert!(result.is_err());
    }
}
