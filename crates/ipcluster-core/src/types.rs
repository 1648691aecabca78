//! Launch request and session state types.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// External job-launcher binaries the distributed mode knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchLauncher {
    /// SLURM `srun -n <N>`.
    Srun,
    /// MPI `mpirun -np <N>`.
    Mpirun,
}

impl BatchLauncher {
    /// Binary name looked up on `PATH`.
    pub fn program(&self) -> &'static str {
        match self {
            BatchLauncher::Srun => "srun",
            BatchLauncher::Mpirun => "mpirun",
        }
    }

    /// Flag carrying the task count.
    pub fn count_flag(&self) -> &'static str {
        match self {
            BatchLauncher::Srun => "-n",
            BatchLauncher::Mpirun => "-np",
        }
    }
}

impl fmt::Display for BatchLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// How the engine processes are started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LauncherKind {
    /// One OS process per engine on this host.
    #[default]
    Local,
    /// A single external launcher invocation spawning the whole group.
    Batch(BatchLauncher),
}

impl LauncherKind {
    pub fn is_local(&self) -> bool {
        matches!(self, LauncherKind::Local)
    }
}

impl FromStr for LauncherKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(LauncherKind::Local),
            "srun" => Ok(LauncherKind::Batch(BatchLauncher::Srun)),
            "mpirun" => Ok(LauncherKind::Batch(BatchLauncher::Mpirun)),
            _ => Err(ConfigError::UnknownLauncher(s.to_string())),
        }
    }
}

impl fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LauncherKind::Local => f.write_str("local"),
            LauncherKind::Batch(b) => write!(f, "{b}"),
        }
    }
}

/// A validated request to start a cluster.
///
/// Built once, before any process is spawned. Fields are private so the
/// engine count cannot change after a start begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    num_engines: NonZeroU32,
    launcher: LauncherKind,
    enable_overlay: bool,
}

impl LaunchConfig {
    /// Validate and build a launch config.
    pub fn new(num_engines: u32, launcher: LauncherKind, enable_overlay: bool) -> ConfigResult<Self> {
        let num_engines = NonZeroU32::new(num_engines).ok_or(ConfigError::ZeroEngines)?;
        Ok(Self {
            num_engines,
            launcher,
            enable_overlay,
        })
    }

    /// Local launcher, no overlay.
    pub fn local(num_engines: u32) -> ConfigResult<Self> {
        Self::new(num_engines, LauncherKind::Local, false)
    }

    /// Parse the launcher from its user-facing name.
    pub fn parse(num_engines: u32, launcher: &str, enable_overlay: bool) -> ConfigResult<Self> {
        Self::new(num_engines, launcher.parse()?, enable_overlay)
    }

    pub fn num_engines(&self) -> u32 {
        self.num_engines.get()
    }

    pub fn launcher(&self) -> LauncherKind {
        self.launcher
    }

    pub fn enable_overlay(&self) -> bool {
        self.enable_overlay
    }
}

/// Lifecycle state of a cluster session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterState {
    #[default]
    Stopped,
    Starting,
    Ready,
    Stopping,
    /// Rollback could not signal one of the spawned processes.
    Failed,
}

impl ClusterState {
    /// True while a start or stop is in flight.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, ClusterState::Starting | ClusterState::Stopping)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClusterState::Stopped => "stopped",
            ClusterState::Starting => "starting",
            ClusterState::Ready => "ready",
            ClusterState::Stopping => "stopping",
            ClusterState::Failed => "failed",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
