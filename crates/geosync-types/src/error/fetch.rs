//! Network fetch errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while fetching a region batch from the service.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum FetchError {
    /// The service could not be reached (DNS, connect, transport failure)
    #[error("Service unreachable: {message}")]
    Unreachable { message: String },

    /// The attempt exceeded the configured per-attempt timeout
    #[error("Request timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// The service answered with a non-success status code
    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    /// All retry attempts were exhausted; carries the final attempt's error
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Whether retrying this failure can help.
    ///
    /// Transport failures, timeouts, and 5xx-class responses are transient;
    /// 4xx-class responses indicate a request the service will keep
    /// rejecting and are surfaced immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable { .. } | Self::Timeout { .. } => true,
            Self::Server { status } => *status >= 500,
            Self::RetriesExhausted { last, .. } => last.is_transient(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_classification() {
        assert!(FetchError::Unreachable { message: "connect refused".to_string() }.is_transient());
        assert!(FetchError::Timeout { duration_secs: 10 }.is_transient());
        assert!(FetchError::Server { status: 502 }.is_transient());
        assert!(!FetchError::Server { status: 400 }.is_transient());
        assert!(!FetchError::Server { status: 404 }.is_transient());
    }
}
