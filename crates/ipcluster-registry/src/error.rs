//! Registry error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for registry calls.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors returned by registry clients.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry at {endpoint} not reachable within {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("connection to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("{method} {path} returned {status}")]
    Status {
        method: String,
        path: String,
        status: u16,
    },

    #[error("malformed registry response: {0}")]
    Decode(String),

    #[error("overlay support unavailable: {0}")]
    OverlayUnavailable(String),

    #[error("registry client is closed")]
    Closed,
}

impl RegistryError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RegistryError::Timeout { .. })
    }
}
