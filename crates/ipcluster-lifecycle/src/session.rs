//! The cluster session: lifecycle state plus everything a running cluster owns.
//!
//! State lives in a `watch` channel so it can be read (or observed) while a
//! start or stop holds the resources. Admission into Starting/Stopping is a
//! compare-and-set on that channel, which is what rejects a second
//! concurrent start or stop instead of queueing it.
//!
//! An admitted operation is a [`Transition`]. If its future is dropped
//! before it settles, the transition reclaims the session on drop so the
//! state never stays Starting or Stopping.

use ipcluster_core::{ClusterState, LaunchConfig};
use ipcluster_process::{JobIdWatch, SpawnedProcesses};
use ipcluster_registry::RegistryClient;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::overlay::OverlayHandle;
use crate::shortcuts::ShortcutScope;
use crate::shutdown::terminate_all;

/// Resources held by a session between a successful start and its stop.
#[derive(Debug, Default)]
pub struct SessionResources {
    pub(crate) config: Option<LaunchConfig>,
    pub(crate) processes: SpawnedProcesses,
    pub(crate) registry_endpoint: Option<String>,
    pub(crate) registry: Option<Box<dyn RegistryClient>>,
    pub(crate) overlay: Option<OverlayHandle>,
    pub(crate) shortcuts: Option<ShortcutScope>,
    pub(crate) job_id: Option<JobIdWatch>,
}

impl SessionResources {
    pub fn config(&self) -> Option<&LaunchConfig> {
        self.config.as_ref()
    }

    pub fn processes(&self) -> &SpawnedProcesses {
        &self.processes
    }

    pub fn overlay(&self) -> Option<&OverlayHandle> {
        self.overlay.as_ref()
    }

    /// Forget everything except the processes, which the caller has
    /// already reaped or reported.
    pub(crate) fn clear(&mut self) {
        self.config = None;
        self.registry_endpoint = None;
        self.registry = None;
        self.overlay = None;
        self.shortcuts = None;
        if let Some(watch) = self.job_id.take() {
            watch.cancel();
        }
        self.processes = SpawnedProcesses::default();
    }
}

/// One cluster session. Exactly one state value per session.
#[derive(Debug)]
pub struct ClusterSession {
    state_tx: watch::Sender<ClusterState>,
    resources: Mutex<SessionResources>,
}

impl Default for ClusterSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterSession {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ClusterState::Stopped);
        Self {
            state_tx,
            resources: Mutex::new(SessionResources::default()),
        }
    }

    pub fn state(&self) -> ClusterState {
        *self.state_tx.borrow()
    }

    /// Observe every state transition from now on.
    pub fn subscribe(&self) -> watch::Receiver<ClusterState> {
        self.state_tx.subscribe()
    }

    /// Admit a start: Stopped/Failed → Starting.
    pub(crate) fn begin_start(&self) -> LifecycleResult<Transition<'_>> {
        let mut rejected = None;
        let mut prior = ClusterState::Stopped;
        self.state_tx.send_if_modified(|state| match *state {
            ClusterState::Stopped | ClusterState::Failed => {
                prior = *state;
                *state = ClusterState::Starting;
                true
            }
            other => {
                rejected = Some(other);
                false
            }
        });
        match rejected {
            None => {
                debug!("state: starting");
                Ok(Transition::new(self, prior))
            }
            Some(ClusterState::Ready) => Err(LifecycleError::AlreadyRunning),
            Some(other) => Err(LifecycleError::InProgress(other)),
        }
    }

    /// Admit a stop: Ready → Stopping.
    pub(crate) fn begin_stop(&self) -> LifecycleResult<Transition<'_>> {
        let mut rejected = None;
        self.state_tx.send_if_modified(|state| {
            if *state == ClusterState::Ready {
                *state = ClusterState::Stopping;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        match rejected {
            None => {
                debug!("state: stopping");
                Ok(Transition::new(self, ClusterState::Ready))
            }
            Some(state) if state.is_transitioning() => Err(LifecycleError::InProgress(state)),
            Some(_) => Err(LifecycleError::NotRunning),
        }
    }

    pub(crate) fn set_state(&self, state: ClusterState) {
        debug!(%state, "state transition");
        self.state_tx.send_replace(state);
    }

    /// Resources, unless a lifecycle operation currently holds them.
    pub(crate) fn try_resources(&self) -> Option<MutexGuard<'_, SessionResources>> {
        self.resources.try_lock().ok()
    }
}

/// An admitted start or stop holding the session.
///
/// `settle` publishes the final state. Dropped unsettled, the transition
/// restores the prior state if it never took the resources; otherwise it
/// signals every process, clears the resources, and leaves the session
/// Stopped, or Failed when some process could not be signalled.
pub(crate) struct Transition<'a> {
    session: &'a ClusterSession,
    prior: ClusterState,
    resources: Option<MutexGuard<'a, SessionResources>>,
    settled: bool,
}

impl<'a> Transition<'a> {
    fn new(session: &'a ClusterSession, prior: ClusterState) -> Self {
        Self {
            session,
            prior,
            resources: None,
            settled: false,
        }
    }

    pub(crate) async fn resources(&mut self) -> &mut SessionResources {
        let guard = match self.resources.take() {
            Some(guard) => guard,
            None => self.session.resources.lock().await,
        };
        self.resources.insert(guard)
    }

    pub(crate) fn settle(mut self, state: ClusterState) {
        self.settled = true;
        self.session.set_state(state);
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Some(resources) = self.resources.as_deref_mut() else {
            warn!(state = %self.prior, "lifecycle operation abandoned before taking the session");
            self.session.set_state(self.prior);
            return;
        };

        warn!("lifecycle operation abandoned, reclaiming cluster processes");
        let unsignalled = terminate_all(&mut resources.processes);
        if let Some(path) = resources.overlay.as_ref().and_then(|o| o.descriptor_path()) {
            if let Err(e) = std::fs::remove_file(path) {
                debug!(path = ?path, error = %e, "could not remove overlay descriptor");
            }
        }
        resources.clear();
        self.session.set_state(if unsignalled > 0 {
            ClusterState::Failed
        } else {
            ClusterState::Stopped
        });
    }
}
