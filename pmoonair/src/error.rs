//! Error types for pmoonair

use std::time::Duration;

/// Result type alias for on-air operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the on-air runtime
///
/// None of them is fatal to the engine: device errors are retried on the next
/// tick, storage errors produce a silent gap.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error coming from the rotation model
    #[error("Rotation error: {0}")]
    Rotation(#[from] pmorotation::Error),

    /// Audio output failure
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// Blob storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine task is gone
    #[error("Engine stopped")]
    EngineStopped,

    /// A blocking task panicked or was cancelled
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Failures reported by an [`AudioOutput`](crate::output::AudioOutput)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OutputError {
    /// The device refused to start (autoplay policy, interrupted play)
    #[error("Playback rejected: {0}")]
    PlaybackRejected(String),

    /// Nothing loaded, or content not ready yet
    #[error("Output not ready")]
    NotReady,

    /// The device did not answer in time
    #[error("Device call timed out after {0:?}")]
    Timeout(Duration),

    /// Any other device failure
    #[error("Device error: {0}")]
    Device(String),
}
