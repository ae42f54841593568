//! Stream error types

use std::time::Duration;
use thiserror::Error;

use crate::guard::Throttled;

/// A single protocol line that could not be turned into a frame
///
/// Decode errors are isolated to the offending line: they are reported and
/// the stream carries on with the next line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed frame payload ({reason}): {raw}")]
    Malformed { raw: String, reason: String },

    #[error("data marker reached the JSON decoder: {raw}")]
    MarkerNotStripped { raw: String },

    #[error("stream closed inside a frame: {raw}")]
    Truncated { raw: String },
}

impl DecodeError {
    /// The raw text that failed to decode
    pub fn raw(&self) -> &str {
        match self {
            DecodeError::Malformed { raw, .. } | DecodeError::MarkerNotStripped { raw } | DecodeError::Truncated { raw } => {
                raw
            }
        }
    }
}

/// Errors that end a streamed response
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Stream transport error: {0}")]
    Transport(String),
}

impl StreamError {
    /// Check if this is a rate limit error
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, StreamError::RateLimited { .. })
    }

    /// Check if this is an authentication failure
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, StreamError::Unauthorized { .. })
    }
}

impl Throttled for StreamError {
    fn is_throttled(&self) -> bool {
        self.is_rate_limit()
    }
}
