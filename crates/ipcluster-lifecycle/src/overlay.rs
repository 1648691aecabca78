//! Secondary task-scheduling overlay.
//!
//! Activation asks the coordinator to turn its engine pool into a scheduler
//! overlay, then persists a JSON scheduler descriptor so out-of-band tools
//! can reattach. Deactivation reverses both and must finish before the
//! primary shutdown, since it talks to the coordinator over the same
//! registry connection.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipcluster_core::LaunchConfig;
use ipcluster_core::config::OverlaySettings;
use ipcluster_registry::{OverlayInfo, RegistryClient};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, LifecycleResult};

const DESCRIPTOR_PREFIX: &str = "ipcluster-overlay-";
const DESCRIPTOR_SUFFIX: &str = ".json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlayStatus {
    #[default]
    Unstarted,
    Running,
    Stopped,
}

impl fmt::Display for OverlayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OverlayStatus::Unstarted => "unstarted",
            OverlayStatus::Running => "running",
            OverlayStatus::Stopped => "stopped",
        })
    }
}

/// Connection details and lifecycle status of one overlay.
#[derive(Debug, Clone, Default)]
pub struct OverlayHandle {
    scheduler_address: String,
    dashboard_address: Option<String>,
    descriptor_path: Option<PathBuf>,
    nthreads: u32,
    status: OverlayStatus,
}

impl OverlayHandle {
    pub fn scheduler_address(&self) -> &str {
        &self.scheduler_address
    }

    pub fn dashboard_address(&self) -> Option<&str> {
        self.dashboard_address.as_deref()
    }

    /// Descriptor file, present while the overlay runs.
    pub fn descriptor_path(&self) -> Option<&Path> {
        self.descriptor_path.as_deref()
    }

    /// Threads per engine the overlay was started with.
    pub fn nthreads(&self) -> u32 {
        self.nthreads
    }

    pub fn status(&self) -> OverlayStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == OverlayStatus::Running
    }

    /// Snippet an external client can use to reattach.
    pub fn connect_hint(&self) -> String {
        match &self.descriptor_path {
            Some(path) => format!("Client(scheduler_file=\"{}\")", path.display()),
            None => format!("Client(\"{}\")", self.scheduler_address),
        }
    }
}

/// Contents of the scheduler descriptor file.
#[derive(Debug, Serialize)]
struct SchedulerDescriptor<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    address: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dashboard: Option<&'a str>,
    engines: u32,
    nthreads: u32,
}

/// Activates and deactivates the overlay on top of a ready cluster.
#[derive(Debug, Clone)]
pub struct SecondaryOverlay {
    descriptor_dir: PathBuf,
    stop_delay: Duration,
}

impl SecondaryOverlay {
    pub fn new(settings: &OverlaySettings) -> Self {
        Self {
            descriptor_dir: settings.descriptor_dir(),
            stop_delay: settings.stop_delay,
        }
    }

    /// Start the overlay and write its descriptor.
    ///
    /// A failure leaves nothing behind: if the descriptor cannot be written
    /// the overlay is stopped again before the error is returned.
    pub async fn activate(
        &self,
        client: &dyn RegistryClient,
        config: &LaunchConfig,
    ) -> LifecycleResult<OverlayHandle> {
        let nthreads = threads_from_env(config.num_engines());
        info!(nthreads, engines = config.num_engines(), "activating overlay");

        let overlay = client
            .become_overlay(nthreads)
            .await
            .map_err(|e| LifecycleError::OverlayActivationFailed(e.to_string()))?;

        let descriptor_path = match self.write_descriptor(&overlay, config.num_engines(), nthreads) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, dir = ?self.descriptor_dir, "failed to write overlay descriptor");
                if let Err(stop_err) = client.stop_overlay().await {
                    warn!(error = %stop_err, "failed to stop half-started overlay");
                }
                return Err(LifecycleError::OverlayActivationFailed(format!(
                    "writing scheduler descriptor: {e}"
                )));
            }
        };

        let handle = OverlayHandle {
            scheduler_address: overlay.scheduler_address,
            dashboard_address: overlay.dashboard_address,
            descriptor_path: Some(descriptor_path),
            nthreads,
            status: OverlayStatus::Running,
        };
        info!(
            scheduler = %handle.scheduler_address,
            dashboard = ?handle.dashboard_address,
            hint = %handle.connect_hint(),
            "overlay running"
        );
        Ok(handle)
    }

    /// Stop a running overlay. No-op unless `handle` is running.
    ///
    /// Errors from the coordinator are logged, not returned: the primary
    /// shutdown still has to happen afterwards.
    pub async fn deactivate(&self, handle: &mut OverlayHandle, client: Option<&dyn RegistryClient>) {
        if !handle.is_running() {
            debug!(status = %handle.status, "overlay not running, nothing to deactivate");
            return;
        }

        match client {
            Some(client) => {
                if let Err(e) = client.stop_overlay().await {
                    warn!(error = %e, "overlay stop request failed");
                }
            }
            None => warn!("no registry connection to stop the overlay through"),
        }

        if let Some(path) = handle.descriptor_path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = ?path, "removed overlay descriptor"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = ?path, error = %e, "failed to remove overlay descriptor"),
            }
        }

        handle.status = OverlayStatus::Stopped;
        // Give the engines time to leave the overlay before they are told to exit.
        tokio::time::sleep(self.stop_delay).await;
        info!("overlay stopped");
    }

    fn write_descriptor(&self, overlay: &OverlayInfo, engines: u32, nthreads: u32) -> io::Result<PathBuf> {
        let descriptor = SchedulerDescriptor {
            kind: "Scheduler",
            address: &overlay.scheduler_address,
            dashboard: overlay.dashboard_address.as_deref(),
            engines,
            nthreads,
        };
        let mut file = tempfile::Builder::new()
            .prefix(DESCRIPTOR_PREFIX)
            .suffix(DESCRIPTOR_SUFFIX)
            .tempfile_in(&self.descriptor_dir)?;
        serde_json::to_writer_pretty(file.as_file_mut(), &descriptor)?;
        file.as_file_mut().flush()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        debug!(path = ?path, "wrote overlay descriptor");
        Ok(path)
    }
}

/// Threads per engine, from `OMP_NUM_THREADS` or the machine size.
pub fn threads_from_env(num_engines: u32) -> u32 {
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    overlay_threads(
        std::env::var("OMP_NUM_THREADS").ok().as_deref(),
        cpus,
        std::env::var("SLURM_NNODES").ok().as_deref(),
        num_engines,
    )
}

/// `OMP_NUM_THREADS` wins when it parses; otherwise the cores of every node
/// are shared evenly between engines. Never less than one.
pub fn overlay_threads(omp_threads: Option<&str>, cpus: usize, nnodes: Option<&str>, num_engines: u32) -> u32 {
    if let Some(n) = omp_threads.and_then(|v| v.trim().parse::<u32>().ok()) {
        return n.max(1);
    }
    let nodes = nnodes
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1);
    let total = cpus as u64 * nodes;
    let per_engine = total / u64::from(num_engines.max(1));
    u32::try_from(per_engine).unwrap_or(u32::MAX).max(1)
}
