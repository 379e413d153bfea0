//! Errors raised by the listener infrastructure.
//!
//! Only configuration loading can fail with an `Err`. Everything that happens
//! on a live channel is reported through subscription state instead.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading listener configuration.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration '{}': {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON or does not match the schema.
    #[error("Failed to parse configuration '{}': {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The configuration parsed but holds an unusable value.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}
