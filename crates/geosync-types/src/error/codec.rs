//! Payload decoding errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while decoding a raw payload batch.
///
/// A malformed record *inside* an otherwise valid batch is not an error at
/// this level; it is skipped and counted by the codec. `MalformedPayload`
/// means the batch as a whole could not be interpreted.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum CodecError {
    /// The payload is not a decodable batch (not JSON, or not an array)
    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },
}

impl CodecError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPayload { message: message.into() }
    }
}
