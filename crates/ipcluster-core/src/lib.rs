//! ipcluster-core: shared types for the ipcluster lifecycle manager.
//!
//! Holds the validated launch record (`LaunchConfig`), the session state
//! enum (`ClusterState`), and the TOML settings file (`ClusterSettings`)
//! consumed by the process, registry, and lifecycle crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ClusterSettings, MAX_SETTING_DURATION, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
