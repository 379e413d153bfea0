//! Configuration for channel subscriptions and pipeline monitors.
//!
//! Every struct deserialises from JSON with per-field defaults, so a config
//! file only needs to name what it changes. Durations are in milliseconds.
//!
//! ```json
//! {
//!   "scope": "validator",
//!   "channel": { "private": true, "receive_own": false, "join_timeout_ms": 10000 },
//!   "fallback": { "silence_threshold_ms": 30000, "poll_interval_ms": 10000 },
//!   "reconnect": { "initial_delay_ms": 1000, "max_delay_ms": 30000, "max_attempts": 5 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use pipeline::{ChannelConfig, RosterDefinition};
use serde::{Deserialize, Serialize};

use crate::errors::ListenerError;

// ---------------------------------------------------------------------------
// Channel options
// ---------------------------------------------------------------------------

/// Per-subscription options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelOptions {
    /// When `false` the manager tears down any subscription and never joins.
    pub enabled: bool,
    /// Private topics require an authorisation refresh before joining.
    pub private: bool,
    /// Whether the subscriber receives its own broadcasts.
    pub receive_own: bool,
    /// Whether broadcasts are acknowledged by the transport.
    pub ack: bool,
    /// How long to wait for a join acknowledgement before recording `timed_out`.
    pub join_timeout_ms: u64,
}

impl ChannelOptions {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Transport-level configuration for a channel with handlers for `events`.
    pub fn channel_config(&self, events: Vec<String>) -> ChannelConfig {
        ChannelConfig {
            private: self.private,
            receive_own: self.receive_own,
            ack: self.ack,
            events,
        }
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            private: true,
            receive_own: true,
            ack: true,
            join_timeout_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Fallback polling
// ---------------------------------------------------------------------------

/// When and how often to poll the system of record directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Time without any event, measured from session start, after which
    /// polling begins.
    pub silence_threshold_ms: u64,
    pub poll_interval_ms: u64,
}

impl FallbackConfig {
    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            silence_threshold_ms: 30_000,
            poll_interval_ms: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Reconnect back-off
// ---------------------------------------------------------------------------

/// Bounded exponential back-off for caller-driven reconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Reconnect attempts allowed before giving up until the next successful
    /// join or session change.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Configuration of a [`crate::PipelineMonitor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Topic scope; the monitored topic is `{scope}:{sessionId}`.
    pub scope: String,
    pub roster: RosterDefinition,
    pub channel: ChannelOptions,
    /// Polling fallback; `None` disables it.
    pub fallback: Option<FallbackConfig>,
    /// Automatic reconnect policy for the run loop; `None` leaves reconnects
    /// entirely to the caller.
    pub reconnect: Option<BackoffConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scope: "validator".to_string(),
            roster: RosterDefinition::validator(),
            channel: ChannelOptions {
                receive_own: false,
                ..ChannelOptions::default()
            },
            fallback: Some(FallbackConfig::default()),
            reconnect: None,
        }
    }
}

impl MonitorConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ConfigParse`] for malformed JSON and
    /// [`ListenerError::InvalidConfig`] for unusable values.
    pub fn from_json_str(json: &str) -> Result<Self, ListenerError> {
        Self::parse(json, Path::new("<inline>"))
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ConfigRead`] if the file cannot be read, plus
    /// the errors of [`MonitorConfig::from_json_str`] naming `path`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ListenerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ListenerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    fn parse(json: &str, path: &Path) -> Result<Self, ListenerError> {
        let config: Self =
            serde_json::from_str(json).map_err(|source| ListenerError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ListenerError> {
        if self.scope.is_empty() || self.scope.contains(':') {
            return Err(ListenerError::InvalidConfig {
                message: format!("scope '{}' must be non-empty and contain no ':'", self.scope),
            });
        }
        if self.channel.join_timeout_ms == 0 {
            return Err(ListenerError::InvalidConfig {
                message: "channel.join_timeout_ms must be positive".to_string(),
            });
        }
        if let Some(fallback) = &self.fallback {
            if fallback.poll_interval_ms == 0 {
                return Err(ListenerError::InvalidConfig {
                    message: "fallback.poll_interval_ms must be positive".to_string(),
                });
            }
        }
        if let Some(reconnect) = &self.reconnect {
            if !(reconnect.multiplier.is_finite() && reconnect.multiplier >= 1.0) {
                return Err(ListenerError::InvalidConfig {
                    message: "reconnect.multiplier must be at least 1.0".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = MonitorConfig::from_json_str("{}").unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.roster.len(), 7);
        assert!(!config.channel.receive_own);
        assert!(config.channel.private);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = MonitorConfig::from_json_str(
            r#"{ "scope": "onboarding", "roster": [{"name":"a"},{"name":"b"}],
                 "fallback": { "poll_interval_ms": 2500 },
                 "reconnect": { "max_attempts": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.scope, "onboarding");
        assert_eq!(config.roster.len(), 2);
        let fallback = config.fallback.unwrap();
        assert_eq!(fallback.poll_interval(), Duration::from_millis(2500));
        assert_eq!(fallback.silence_threshold(), Duration::from_secs(30));
        assert_eq!(config.reconnect.unwrap().initial_delay_ms, 1_000);
    }

    #[test]
    fn null_fallback_disables_polling() {
        let config = MonitorConfig::from_json_str(r#"{ "fallback": null }"#).unwrap();
        assert!(config.fallback.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{ "scope": "a:b" }"#),
            Err(ListenerError::InvalidConfig { .. })
        ));
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{ "reconnect": { "multiplier": 0.5 } }"#),
            Err(ListenerError::InvalidConfig { .. })
        ));
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{ "roster": [] }"#),
            Err(ListenerError::ConfigParse { .. })
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = MonitorConfig::from_json_file("/nonexistent/pipewatch.json").unwrap_err();
        assert!(matches!(err, ListenerError::ConfigRead { .. }));
    }

    #[test]
    fn file_errors_name_the_file() {
        let path = std::env::temp_dir().join(format!("pipewatch-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let err = MonitorConfig::from_json_file(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        match err {
            ListenerError::ConfigParse { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("expected ConfigParse, got {other:?}"),
        }
    }

    #[test]
    fn inline_errors_are_labelled_inline() {
        let err = MonitorConfig::from_json_str("{ not json").unwrap_err();
        match err {
            ListenerError::ConfigParse { path, .. } => {
                assert_eq!(path, std::path::PathBuf::from("<inline>"))
            }
            other => panic!("expected ConfigParse, got {other:?}"),
        }
    }
}
