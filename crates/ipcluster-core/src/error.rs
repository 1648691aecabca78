//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration and argument validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while validating a launch request or loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("number of engines must be greater than zero")]
    ZeroEngines,

    #[error("unsupported launcher: {0} (expected local, srun or mpirun)")]
    UnknownLauncher(String),

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings file: {0}")]
    Parse(#[from] toml::de::Error),
}
