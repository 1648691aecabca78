//! Process launcher: starts the coordinator and its engines.
//!
//! Local mode:
//! 1. `ipcontroller --ip=127.0.0.1 --log-to-file`
//! 2. wait for the settle delay so the coordinator's listener is up
//! 3. `ipengine --log-to-file`, once per engine
//!
//! Distributed mode:
//! 1. verify the batch launcher (srun/mpirun) exists on `PATH`
//! 2. `ipcontroller --ip=* --log-to-file`
//! 3. wait for the settle delay
//! 4. `srun -n N ipengine --location=<host> --log-to-file`
//!
//! Every handle is stored in the caller's [`SpawnedProcesses`] the moment
//! it exists, so a failure part-way leaves the caller owning exactly what
//! must be reclaimed.

use std::sync::Arc;
use std::time::Duration;

use ipcluster_core::{
    BatchLauncher, ClusterSettings, LaunchConfig, LauncherKind,
    config::{CoordinatorSettings, EngineSettings},
};
use tracing::{debug, info};

use crate::error::{LaunchError, LaunchResult};
use crate::handle::{EngineGroup, SpawnedProcesses};
use crate::host;
use crate::spawn::{CommandSpec, Spawn};

const LOOPBACK: &str = "127.0.0.1";
const WILDCARD: &str = "*";

/// Spawns cluster processes through a [`Spawn`] implementation.
pub struct ProcessLauncher {
    spawner: Arc<dyn Spawn>,
    coordinator: CoordinatorSettings,
    engine: EngineSettings,
    settle_delay: Duration,
}

impl ProcessLauncher {
    pub fn new(spawner: Arc<dyn Spawn>, settings: &ClusterSettings) -> Self {
        Self {
            spawner,
            coordinator: settings.coordinator.clone(),
            engine: settings.engine.clone(),
            settle_delay: settings.launch.settle_delay,
        }
    }

    /// Spawn everything `config` asks for.
    pub async fn spawn(&self, config: &LaunchConfig, procs: &mut SpawnedProcesses) -> LaunchResult<()> {
        match config.launcher() {
            LauncherKind::Local => self.spawn_local(config.num_engines(), procs).await,
            LauncherKind::Batch(launcher) => {
                self.spawn_distributed(config.num_engines(), launcher, procs)
                    .await
            }
        }
    }

    /// Coordinator on loopback plus one engine process per engine.
    pub async fn spawn_local(&self, num_engines: u32, procs: &mut SpawnedProcesses) -> LaunchResult<()> {
        self.spawn_coordinator(LOOPBACK, procs)?;
        self.settle().await;

        let command = self.engine_command(None);
        let mut handles = Vec::with_capacity(num_engines as usize);
        for i in 0..num_engines {
            let label = format!("engine-{i}");
            match self.spawner.spawn(&label, &command) {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    procs.engines = Some(EngineGroup::Multiple(handles));
                    return Err(LaunchError::Spawn {
                        label,
                        program: command.program.clone(),
                        source,
                    });
                }
            }
        }
        procs.engines = Some(EngineGroup::Multiple(handles));

        info!(num_engines, "local engines spawned");
        Ok(())
    }

    /// Coordinator on all interfaces plus one batch-launcher invocation.
    pub async fn spawn_distributed(
        &self,
        num_engines: u32,
        launcher: BatchLauncher,
        procs: &mut SpawnedProcesses,
    ) -> LaunchResult<()> {
        let launcher_path = self
            .spawner
            .locate(launcher.program())
            .ok_or_else(|| LaunchError::UnsupportedLauncher(launcher.program().to_string()))?;
        let hostname = host::hostname().map_err(LaunchError::Hostname)?;

        self.spawn_coordinator(WILDCARD, procs)?;
        self.settle().await;

        let engine = self.engine_command(Some(&hostname));
        let command = CommandSpec::new(launcher_path.to_string_lossy())
            .arg(launcher.count_flag())
            .arg(num_engines.to_string())
            .arg(engine.program)
            .args(engine.args);
        let label = format!("engines ({launcher})");
        let handle = self
            .spawner
            .spawn(&label, &command)
            .map_err(|source| LaunchError::Spawn {
                label: label.clone(),
                program: command.program.clone(),
                source,
            })?;
        procs.engines = Some(EngineGroup::Single(handle));

        info!(num_engines, %launcher, %hostname, "distributed engines launched");
        Ok(())
    }

    /// `host:port` of the coordinator's registry for the given launch kind.
    pub fn registry_address(&self, kind: LauncherKind) -> LaunchResult<String> {
        let host = match kind {
            LauncherKind::Local => LOOPBACK.to_string(),
            LauncherKind::Batch(_) => host::hostname().map_err(LaunchError::Hostname)?,
        };
        Ok(format!("{host}:{}", self.coordinator.registry_port))
    }

    pub fn coordinator_command(&self, bind: &str) -> CommandSpec {
        let mut command = CommandSpec::new(&self.coordinator.program).arg(format!("--ip={bind}"));
        if self.coordinator.log_to_file {
            command = command.arg("--log-to-file");
        }
        command
    }

    pub fn engine_command(&self, location: Option<&str>) -> CommandSpec {
        let mut command = CommandSpec::new(&self.engine.program);
        if let Some(host) = location {
            command = command.arg(format!("--location={host}"));
        }
        if self.engine.log_to_file {
            command = command.arg("--log-to-file");
        }
        command
    }

    fn spawn_coordinator(&self, bind: &str, procs: &mut SpawnedProcesses) -> LaunchResult<()> {
        let command = self.coordinator_command(bind);
        let handle = self
            .spawner
            .spawn("coordinator", &command)
            .map_err(|source| LaunchError::Spawn {
                label: "coordinator".to_string(),
                program: command.program.clone(),
                source,
            })?;
        info!(pid = ?handle.pid(), %bind, "coordinator spawned");
        procs.coordinator = Some(handle);
        Ok(())
    }

    async fn settle(&self) {
        debug!(delay = ?self.settle_delay, "waiting for coordinator to settle");
        tokio::time::sleep(self.settle_delay).await;
    }
}
