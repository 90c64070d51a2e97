//! Typed error definitions for geosync.
//!
//! This module provides a structured error hierarchy with specific error types
//! for the engine's domains. All errors are designed to be:
//!
//! - **Serializable** for diagnostics via serde
//! - **Displayable** for logging via Display trait
//! - **Matchable** for recovery logic via enum variants
//! - **Composable** via thiserror derive macros

mod codec;
mod fetch;
mod store;

pub use codec::CodecError;
pub use fetch::FetchError;
pub use store::StoreError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type that wraps all domain-specific sync errors.
///
/// Use this when a single error type must represent any failure the
/// engine can report (for example on the sync event channel).
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "domain", content = "error")]
pub enum SyncError {
    /// Wraps a payload decoding error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Wraps a network fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Wraps a persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Whether a later sync cycle may succeed without operator action.
    ///
    /// Everything except a 4xx-class server rejection is recoverable:
    /// malformed records are skipped, transient network errors are retried,
    /// and persistence failures are retried on the next cycle with the
    /// cursor withheld.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_transient(),
            Self::Codec(_) | Self::Store(_) => true,
        }
    }
}

/// Standard Result type using SyncError.
pub type Result<T> = std::result::Result<T, SyncError>;
