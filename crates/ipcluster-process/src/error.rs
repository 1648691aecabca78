//! Launcher error types.

use thiserror::Error;

/// Result type alias for process launching.
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Errors that can occur while spawning cluster processes.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("launcher binary not found: {0}")]
    UnsupportedLauncher(String),

    #[error("failed to spawn {label} ({program}): {source}")]
    Spawn {
        label: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to resolve hostname: {0}")]
    Hostname(#[source] std::io::Error),
}
