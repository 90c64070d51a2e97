//! Persistence errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the local store.
///
/// All of these are recoverable from the sync loop's perspective: a failed
/// batch is retried on the next cycle with the cursor withheld.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum StoreError {
    /// A database operation failed
    #[error("Persistence failure: {message}")]
    Persistence { message: String },

    /// A stored value could not be interpreted
    #[error("Corrupt stored value for {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl StoreError {
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence { message: message.into() }
    }
}
