//! phoenixNAP client errors

use thiserror::Error;

/// Errors that can occur when interacting with the phoenixNAP API
#[derive(Debug, Error)]
pub enum PnapError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// phoenixNAP API returned an error
    #[error("phoenixNAP API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Token request rejected (bad client id/secret, revoked client, etc.)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., tag not defined, block still assigned)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl PnapError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Transport failures and 5xx/429 responses (reported as `Api`) are
    /// transient; everything else needs a change of input or state.
    pub fn is_transient(&self) -> bool {
        matches!(self, PnapError::Http(_) | PnapError::Api(_))
    }
}
