//! Error types for efs-backup-state

use thiserror::Error;

/// Errors that can occur while reading deployed state
#[derive(Error, Debug)]
pub enum StateError {
    /// Snapshot file could not be read
    #[error("failed to read state snapshot {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot content is not valid JSON for the snapshot schema
    #[error("invalid state snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    /// The same stack appears twice in one region
    #[error("duplicate stack '{name}' in region {region}")]
    DuplicateStack { region: String, name: String },

    /// The lookup backend could not answer
    #[error("state backend unavailable: {0}")]
    Unavailable(String),
}

/// Result type for deployed-state lookups
pub type StateResult<T> = std::result::Result<T, StateError>;
