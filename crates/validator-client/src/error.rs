//! Validator client errors

use thiserror::Error;

/// Errors that can occur when talking to the validator's JSON-RPC endpoint
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// HTTP request/response error (connection refused, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body is not a JSON-RPC envelope or the result has the wrong shape
    #[error("Failed to decode response: {message} - Response: {body}")]
    Decode {
        /// Decoder message
        message: String,
        /// Raw response body
        body: String,
    },

    /// Validator returned a nonzero error code
    #[error("RPC error {code}: {message} - Response: {body}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// JSON-RPC error message
        message: String,
        /// Raw response body
        body: String,
    },

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configured RPC URL cannot be parsed
    #[error("Invalid RPC URL: {0}")]
    InvalidUrl(String),
}

impl ValidatorError {
    /// True for network and decode failures.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Decode { .. })
    }

    /// True when the validator itself rejected the call.
    #[must_use]
    pub fn is_rpc(&self) -> bool {
        matches!(self, Self::Rpc { .. })
    }
}
