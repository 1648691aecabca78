//! Lifecycle error types.

use std::time::Duration;

use ipcluster_core::{ClusterState, ConfigError};
use ipcluster_process::LaunchError;
use ipcluster_registry::RegistryError;
use thiserror::Error;

/// Result type alias for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Final disposition of a failed `start` or `stop`.
///
/// Every variant raised after processes were spawned has already been
/// rolled back by the time the caller sees it.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ConfigError),

    #[error("cluster is already running")]
    AlreadyRunning,

    #[error("cluster is not running")]
    NotRunning,

    #[error("another lifecycle operation is in progress (state: {0})")]
    InProgress(ClusterState),

    #[error("launcher {0} is not installed on this system")]
    UnsupportedLauncher(String),

    #[error("failed to launch cluster processes: {0}")]
    Launch(#[source] LaunchError),

    #[error("coordinator at {endpoint} did not answer within {timeout:?}")]
    ConnectionTimeout { endpoint: String, timeout: Duration },

    #[error("only {registered} of {expected} engines registered within {timeout:?}")]
    EngineTimeout {
        expected: u32,
        registered: usize,
        timeout: Duration,
    },

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("overlay activation failed: {0}")]
    OverlayActivationFailed(String),
}

impl From<LaunchError> for LifecycleError {
    fn from(err: LaunchError) -> Self {
        match err {
            LaunchError::UnsupportedLauncher(program) => LifecycleError::UnsupportedLauncher(program),
            other => LifecycleError::Launch(other),
        }
    }
}
