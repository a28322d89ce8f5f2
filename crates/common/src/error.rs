//! Error types for Funnel

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using Funnel Error
pub type Result<T> = std::result::Result<T, Error>;

/// Funnel error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("No results found at {}. Run the tests first", .0.display())]
    SnapshotMissing(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Import error: {0}")]
    Import(String),
}

impl Error {
    /// Whether this error means there is nothing to render yet.
    pub fn is_snapshot_missing(&self) -> bool {
        matches!(self, Error::SnapshotMissing(_))
    }
}
