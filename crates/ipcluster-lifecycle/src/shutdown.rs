//! Primary cluster shutdown.
//!
//! The coordinator is asked to stop every engine and then itself. Process
//! exit is then confirmed by polling every handle the session owns, on a
//! fixed interval for a bounded number of polls. Survivors are reported,
//! never retried.

use std::time::Duration;

use ipcluster_core::config::{MAX_SETTING_DURATION, ShutdownSettings};
use ipcluster_process::SpawnedProcesses;
use ipcluster_registry::ShutdownTargets;
use tracing::{debug, info, warn};

use crate::session::SessionResources;

/// How a shutdown ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every process exited; `polls` exit checks were needed after the first.
    Complete { polls: u32 },
    /// These processes were still alive when the poll window closed.
    Incomplete { alive: Vec<String> },
}

impl ShutdownOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, ShutdownOutcome::Complete { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    poll_interval: Duration,
    max_polls: u32,
}

impl ShutdownCoordinator {
    pub fn new(settings: &ShutdownSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval.min(MAX_SETTING_DURATION),
            max_polls: settings.max_polls,
        }
    }

    /// Total time `await_exit` may spend polling.
    pub fn window(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_polls)
    }

    /// Shut down everything `resources` owns except the overlay, which the
    /// caller must already have deactivated.
    ///
    /// Session shortcuts are released first. When there is no registry
    /// connection, or the directive fails, each process is signalled
    /// directly instead.
    pub async fn shutdown(&self, resources: &mut SessionResources) -> ShutdownOutcome {
        if let Some(scope) = resources.shortcuts.take() {
            debug!(names = ?scope.names(), "releasing session shortcuts");
        }

        let directed = match resources.registry.as_deref() {
            Some(client) => match client.shutdown(ShutdownTargets::All, true).await {
                Ok(()) => {
                    info!(endpoint = %client.endpoint(), "shutdown directive sent to engines and hub");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "shutdown directive failed, signalling processes directly");
                    false
                }
            },
            None => {
                debug!("no registry connection, signalling processes directly");
                false
            }
        };
        if !directed {
            terminate_all(&mut resources.processes);
        }

        if let Some(client) = resources.registry.take() {
            if let Err(e) = client.close().await {
                debug!(error = %e, "registry close failed");
            }
        }

        self.await_exit(&mut resources.processes).await
    }

    /// Poll until every process has exited or the window closes.
    pub async fn await_exit(&self, processes: &mut SpawnedProcesses) -> ShutdownOutcome {
        let mut alive = processes.alive_labels();
        let mut polls = 0;
        while !alive.is_empty() && polls < self.max_polls {
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;
            alive = processes.alive_labels();
            debug!(poll = polls, max_polls = self.max_polls, alive = alive.len(), "waiting for processes to exit");
        }

        if alive.is_empty() {
            info!(polls, "all cluster processes exited");
            ShutdownOutcome::Complete { polls }
        } else {
            warn!(?alive, window = ?self.window(), "processes still alive after shutdown window");
            ShutdownOutcome::Incomplete { alive }
        }
    }
}

/// Signal every live process. Returns how many could not be signalled.
pub fn terminate_all(processes: &mut SpawnedProcesses) -> usize {
    let mut failed = 0;
    for handle in processes.handles_mut() {
        if !handle.is_alive() {
            continue;
        }
        if let Err(e) = handle.terminate() {
            warn!(label = %handle.label(), pid = ?handle.pid(), error = %e, "failed to signal process");
            failed += 1;
        }
    }
    failed
}
