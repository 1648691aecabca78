//! Cluster controller: the state machine over one session.
//!
//! ```text
//! start(config)                          stop()
//!   Stopped|Failed → Starting              Ready → Stopping
//!   ProcessLauncher::spawn                 SecondaryOverlay::deactivate
//!   ReadinessWaiter::wait                  ShutdownCoordinator::shutdown
//!   SecondaryOverlay::activate (opt.)      → Stopped
//!   → Ready
//!   on failure: rollback → Stopped (Failed if a process could not be signalled)
//! ```
//!
//! The controller is the only writer of the session. Start and stop are
//! admitted by a compare-and-set on the session state, so a second call
//! while one is in flight fails immediately with `InProgress`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ipcluster_core::{ClusterSettings, ClusterState, LaunchConfig};
use ipcluster_process::{JobIdWatch, OsSpawner, ProcessLauncher, Spawn};
use ipcluster_registry::{HttpRegistryConnector, RegistryConnector};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::overlay::{OverlayHandle, SecondaryOverlay};
use crate::readiness::ReadinessWaiter;
use crate::session::{ClusterSession, SessionResources};
use crate::shortcuts::{SESSION_SHORTCUTS, ShortcutRegistry};
use crate::shutdown::{ShutdownCoordinator, ShutdownOutcome, terminate_all};

const JOB_ID_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a successful `start`.
#[derive(Debug, Clone)]
pub struct StartReport {
    pub config: LaunchConfig,
    pub registry_endpoint: String,
    pub engine_ids: Vec<u32>,
    /// Time the engines took to register.
    pub elapsed: Duration,
    pub overlay: Option<OverlayHandle>,
}

/// Result of a `stop`. An incomplete shutdown is reported here, not as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    pub outcome: ShutdownOutcome,
    pub job_id: Option<String>,
}

/// Snapshot of the session.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub state: ClusterState,
    /// False while a start or stop holds the session; only `state` is set then.
    pub detailed: bool,
    pub config: Option<LaunchConfig>,
    pub coordinator_pid: Option<u32>,
    pub engine_pids: Vec<u32>,
    pub registry_endpoint: Option<String>,
    pub overlay: Option<OverlayHandle>,
    pub shortcuts: Vec<String>,
    pub job_id: Option<String>,
}

pub struct ClusterController {
    session: ClusterSession,
    launcher: ProcessLauncher,
    connector: Arc<dyn RegistryConnector>,
    readiness: ReadinessWaiter,
    shutdown: ShutdownCoordinator,
    overlay: SecondaryOverlay,
    shortcuts: ShortcutRegistry,
    job_id_file: Option<PathBuf>,
    job_id_timeout: Duration,
}

impl ClusterController {
    pub fn new(
        session: ClusterSession,
        settings: &ClusterSettings,
        spawner: Arc<dyn Spawn>,
        connector: Arc<dyn RegistryConnector>,
    ) -> Self {
        Self {
            session,
            launcher: ProcessLauncher::new(spawner, settings),
            connector,
            readiness: ReadinessWaiter::new(&settings.readiness),
            shutdown: ShutdownCoordinator::new(&settings.shutdown),
            overlay: SecondaryOverlay::new(&settings.overlay),
            shortcuts: ShortcutRegistry::new(),
            job_id_file: settings.launch.job_id_file.clone(),
            job_id_timeout: settings.launch.job_id_timeout,
        }
    }

    /// Controller over a fresh session using real processes and the HTTP registry.
    pub fn from_settings(settings: &ClusterSettings) -> Self {
        Self::new(
            ClusterSession::new(),
            settings,
            Arc::new(OsSpawner),
            Arc::new(HttpRegistryConnector::new()),
        )
    }

    pub fn state(&self) -> ClusterState {
        self.session.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClusterState> {
        self.session.subscribe()
    }

    /// Shortcuts currently offered; populated only while Ready.
    pub fn shortcuts(&self) -> &ShortcutRegistry {
        &self.shortcuts
    }

    /// Start a cluster. On any failure everything spawned so far is
    /// reclaimed before the error is returned. Dropping the returned future
    /// mid-start reclaims the processes as well.
    pub async fn start(&self, config: LaunchConfig) -> LifecycleResult<StartReport> {
        let mut transition = self.session.begin_start()?;
        let resources = transition.resources().await;
        info!(
            num_engines = config.num_engines(),
            launcher = %config.launcher(),
            overlay = config.enable_overlay(),
            "starting cluster"
        );

        match self.bring_up(&config, resources).await {
            Ok(report) => {
                transition.settle(ClusterState::Ready);
                info!(
                    num_engines = config.num_engines(),
                    endpoint = %report.registry_endpoint,
                    elapsed_secs = report.elapsed.as_secs_f64(),
                    "cluster ready"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, "cluster start failed, rolling back");
                let state = if self.rollback(resources).await {
                    ClusterState::Stopped
                } else {
                    ClusterState::Failed
                };
                transition.settle(state);
                Err(err)
            }
        }
    }

    /// Stop the running cluster. The state ends Stopped even when some
    /// processes outlive the shutdown window; the report names them.
    pub async fn stop(&self) -> LifecycleResult<StopReport> {
        let mut transition = self.session.begin_stop()?;
        let resources = transition.resources().await;
        info!("stopping cluster");

        // The overlay talks to the hub, so it goes first.
        if let Some(mut overlay) = resources.overlay.take() {
            self.overlay
                .deactivate(&mut overlay, resources.registry.as_deref())
                .await;
        }

        let outcome = self.shutdown.shutdown(resources).await;
        let job_id = match resources.job_id.take() {
            Some(mut watch) => {
                let id = watch.current().await.map(str::to_string);
                watch.cancel();
                id
            }
            None => None,
        };

        match &outcome {
            ShutdownOutcome::Complete { .. } => info!("cluster stopped"),
            ShutdownOutcome::Incomplete { alive } => warn!(
                ?alive,
                job_id = job_id.as_deref().unwrap_or("-"),
                "shutdown incomplete, surviving processes must be cleaned up manually"
            ),
        }

        resources.clear();
        transition.settle(ClusterState::Stopped);
        Ok(StopReport { outcome, job_id })
    }

    /// Current state plus, unless a start or stop is in flight, what the
    /// session holds.
    pub async fn status(&self) -> StatusReport {
        let state = self.session.state();
        let Some(mut guard) = self.session.try_resources() else {
            return StatusReport {
                state,
                ..Default::default()
            };
        };

        let resources = &mut *guard;
        let job_id = match resources.job_id.as_mut() {
            Some(watch) => watch.current().await.map(str::to_string),
            None => None,
        };
        let processes = resources.processes();
        StatusReport {
            state,
            detailed: true,
            config: resources.config().cloned(),
            coordinator_pid: processes.coordinator.as_ref().and_then(|h| h.pid()),
            engine_pids: processes.engines.as_ref().map(|g| g.pids()).unwrap_or_default(),
            registry_endpoint: resources.registry_endpoint.clone(),
            overlay: resources.overlay().cloned(),
            shortcuts: self.shortcuts.names(),
            job_id,
        }
    }

    async fn bring_up(
        &self,
        config: &LaunchConfig,
        resources: &mut SessionResources,
    ) -> LifecycleResult<StartReport> {
        resources.config = Some(config.clone());

        if !config.launcher().is_local() {
            if let Some(path) = &self.job_id_file {
                remove_stale_job_id(path);
                resources.job_id = Some(JobIdWatch::spawn(
                    path.clone(),
                    JOB_ID_POLL_INTERVAL,
                    self.job_id_timeout,
                ));
            }
        }

        self.launcher.spawn(config, &mut resources.processes).await?;

        let endpoint = self.launcher.registry_address(config.launcher())?;
        resources.registry_endpoint = Some(endpoint.clone());
        let readiness = self
            .readiness
            .wait(
                self.connector.as_ref(),
                &endpoint,
                config.num_engines(),
                &mut resources.registry,
            )
            .await?;

        if config.enable_overlay() {
            let Some(client) = resources.registry.as_deref() else {
                return Err(LifecycleError::OverlayActivationFailed(
                    "no registry connection".to_string(),
                ));
            };
            resources.overlay = Some(self.overlay.activate(client, config).await?);
        }

        resources.shortcuts = Some(self.shortcuts.register_scope(&SESSION_SHORTCUTS));

        Ok(StartReport {
            config: config.clone(),
            registry_endpoint: endpoint,
            engine_ids: readiness.engine_ids,
            elapsed: readiness.elapsed,
            overlay: resources.overlay.clone(),
        })
    }

    /// Undo a partial start. Returns false if some process could not be
    /// signalled, which leaves the session Failed.
    async fn rollback(&self, resources: &mut SessionResources) -> bool {
        resources.shortcuts = None;
        if let Some(client) = resources.registry.take() {
            if let Err(e) = client.close().await {
                debug!(error = %e, "registry close failed during rollback");
            }
        }
        if let Some(watch) = resources.job_id.take() {
            watch.cancel();
        }

        let unsignalled = terminate_all(&mut resources.processes);
        let outcome = self.shutdown.await_exit(&mut resources.processes).await;
        if let ShutdownOutcome::Incomplete { alive } = &outcome {
            warn!(?alive, "processes survived rollback");
        }
        resources.clear();

        if unsignalled > 0 {
            warn!(unsignalled, "rollback could not signal every process");
            false
        } else {
            info!("rollback complete");
            true
        }
    }
}

fn remove_stale_job_id(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = ?path, "removed stale job id file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = ?path, error = %e, "could not remove stale job id file"),
    }
}
