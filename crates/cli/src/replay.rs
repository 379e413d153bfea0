//! Recorded channel traffic and store seeds.
//!
//! A replay file holds one broadcast per line:
//!
//! ```text
//! {"event":"agent_started","payload":{"agent":"ExtractorAgent"}}
//! {"event":"pipeline_complete","payload":{"status":"complete","reportId":"r1","score":82}}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. A store seed is a
//! single JSON object describing what the system of record holds for the
//! watched session.

use std::path::Path;

use anyhow::{Context, Result};
use pipeline::ArtifactRecord;
use serde::Deserialize;
use serde_json::Value;

/// One recorded broadcast.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordedEvent {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// Persisted state of the watched session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoreSeed {
    pub status: String,
    #[serde(default)]
    pub artifact: Option<ArtifactRecord>,
}

pub fn parse_events(input: &str) -> Result<Vec<RecordedEvent>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid event on line {}", i + 1))
        })
        .collect()
}

pub fn load_events(path: &Path) -> Result<Vec<RecordedEvent>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay file '{}'", path.display()))?;
    parse_events(&raw).with_context(|| format!("Failed to parse replay file '{}'", path.display()))
}

pub fn load_seed(path: &Path) -> Result<StoreSeed> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read store seed '{}'", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse store seed '{}'", path.display()))
}
