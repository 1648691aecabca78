//! ipcluster-process: OS process management for the cluster lifecycle.
//!
//! Spawns the coordinator and the engine processes, either directly on
//! this host or through an external batch launcher, and hands back
//! pollable handles. Readiness is not this crate's concern.
//!
//! # Architecture
//!
//! ```text
//! ProcessLauncher
//!   ├── Spawn (seam)          → OsSpawner (tokio::process) in production
//!   ├── spawn_local()         → coordinator + EngineGroup::Multiple
//!   └── spawn_distributed()   → coordinator + EngineGroup::Single (srun/mpirun)
//!
//! ProcessHandle
//!   ├── try_status()  non-blocking exit query
//!   └── terminate()   SIGTERM, no-op once exited
//!
//! JobIdWatch        cancellable, deadline-bound poll of a job-id file
//! ```

pub mod error;
pub mod handle;
pub mod host;
pub mod jobid;
pub mod launcher;
pub mod spawn;

pub use error::{LaunchError, LaunchResult};
pub use handle::{EngineGroup, ProcessControl, ProcessHandle, ProcessStatus, SpawnedProcesses};
pub use jobid::JobIdWatch;
pub use launcher::ProcessLauncher;
pub use spawn::{CommandSpec, OsSpawner, Spawn};
