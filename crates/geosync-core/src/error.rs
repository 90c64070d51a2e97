//! Unified error types for Geosync Core.

use geosync_types::{CodecError, FetchError, StoreError, SyncError};
use serde::Serialize;
use thiserror::Error;

/// Main error type for all engine operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// Database operation failed (SQLite).
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Network request failed (HTTP client).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// File system I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload decoding failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Region fetch failed after retries.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Store-level persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Background task failed to join.
    #[error("Task error: {0}")]
    Task(String),

    /// Unclassified error with message.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Unknown(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Unknown(s.to_string())
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Task(e.to_string())
    }
}

impl EngineError {
    /// Collapse into the serializable domain taxonomy for event reporting.
    pub fn to_sync_error(&self) -> SyncError {
        match self {
            Self::Codec(e) => SyncError::Codec(e.clone()),
            Self::Fetch(e) => SyncError::Fetch(e.clone()),
            Self::Store(e) => SyncError::Store(e.clone()),
            Self::Database(e) => SyncError::Store(StoreError::persistence(e.to_string())),
            Self::Network(e) => SyncError::Fetch(FetchError::Unreachable { message: e.to_string() }),
            Self::Json(e) => SyncError::Codec(CodecError::malformed(e.to_string())),
            other => SyncError::Store(StoreError::persistence(other.to_string())),
        }
    }
}
