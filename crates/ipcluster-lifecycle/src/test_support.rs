//! Scripted fakes for the spawn and registry seams.
//!
//! A `FakeHub` plays the coordinator: it owns the fake processes, the
//! registered engine ids, and a log of registry calls. Spawner, connector,
//! and clients all share one hub so a test can script the whole cluster.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ipcluster_process::{CommandSpec, ProcessControl, ProcessHandle, ProcessStatus, Spawn};
use ipcluster_registry::{
    OverlayInfo, RegistryClient, RegistryConnector, RegistryError, RegistryFuture, ShutdownTargets,
};

#[derive(Debug)]
struct FakeProcess {
    label: String,
    alive: bool,
    stuck: bool,
    signal_fails: bool,
}

#[derive(Debug)]
struct HubState {
    reachable: bool,
    overlay_available: bool,
    shutdown_fails: bool,
    auto_register: bool,
    engine_ids: Vec<u32>,
    processes: Vec<FakeProcess>,
    calls: Vec<String>,
    spawned: Vec<String>,
    terminated: Vec<String>,
}

impl Default for HubState {
    fn default() -> Self {
        Self {
            reachable: true,
            overlay_available: true,
            shutdown_fails: false,
            auto_register: false,
            engine_ids: Vec::new(),
            processes: Vec::new(),
            calls: Vec::new(),
            spawned: Vec::new(),
            terminated: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeHub {
    state: Arc<Mutex<HubState>>,
}

impl FakeHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn register_engines(&self, n: u32) {
        self.lock().engine_ids = (0..n).collect();
    }

    pub(crate) fn set_engine_ids(&self, ids: Vec<u32>) {
        self.lock().engine_ids = ids;
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    pub(crate) fn set_overlay_available(&self, available: bool) {
        self.lock().overlay_available = available;
    }

    pub(crate) fn set_shutdown_fails(&self, fails: bool) {
        self.lock().shutdown_fails = fails;
    }

    /// Engines register as soon as their process is spawned.
    pub(crate) fn set_auto_register(&self, auto: bool) {
        self.lock().auto_register = auto;
    }

    /// Processes with this label ignore both the directive and signals.
    pub(crate) fn set_stuck(&self, label: &str) {
        let mut state = self.lock();
        for p in state.processes.iter_mut().filter(|p| p.label == label) {
            p.stuck = true;
        }
    }

    pub(crate) fn set_signal_fails(&self, label: &str) {
        let mut state = self.lock();
        for p in state.processes.iter_mut().filter(|p| p.label == label) {
            p.signal_fails = true;
            p.stuck = true;
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Command lines spawned, in order.
    pub(crate) fn spawned(&self) -> Vec<String> {
        self.lock().spawned.clone()
    }

    /// Labels of processes that received a terminate signal.
    pub(crate) fn terminated(&self) -> Vec<String> {
        self.lock().terminated.clone()
    }

    pub(crate) fn live_processes(&self) -> usize {
        self.lock().processes.iter().filter(|p| p.alive).count()
    }

    /// A new running process owned by this hub.
    pub(crate) fn fake_process(&self, label: &str) -> ProcessHandle {
        let mut state = self.lock();
        state.processes.push(FakeProcess {
            label: label.to_string(),
            alive: true,
            stuck: false,
            signal_fails: false,
        });
        let index = state.processes.len() - 1;
        ProcessHandle::new(
            label,
            Box::new(FakeControl {
                hub: self.clone(),
                index,
            }),
        )
    }

    fn record(&self, call: impl Into<String>) {
        self.lock().calls.push(call.into());
    }

    fn register_spawned(&self, label: &str, command: &CommandSpec) {
        let mut state = self.lock();
        state.spawned.push(command.display());
        if !state.auto_register {
            return;
        }
        let count = if label.starts_with("engine-") {
            1
        } else if label.starts_with("engines (") {
            command
                .args
                .get(1)
                .and_then(|n| n.parse::<u32>().ok())
                .unwrap_or(0)
        } else {
            0
        };
        let next = state.engine_ids.len() as u32;
        state.engine_ids.extend(next..next + count);
    }
}

#[derive(Debug)]
struct FakeControl {
    hub: FakeHub,
    index: usize,
}

impl ProcessControl for FakeControl {
    fn pid(&self) -> Option<u32> {
        Some(1000 + self.index as u32)
    }

    fn try_status(&mut self) -> io::Result<ProcessStatus> {
        if self.hub.lock().processes[self.index].alive {
            Ok(ProcessStatus::Running)
        } else {
            Ok(ProcessStatus::Exited(Some(0)))
        }
    }

    fn terminate(&mut self) -> io::Result<()> {
        let mut state = self.hub.lock();
        let label = state.processes[self.index].label.clone();
        state.terminated.push(label);
        let process = &mut state.processes[self.index];
        if process.signal_fails {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        if !process.stuck {
            process.alive = false;
        }
        Ok(())
    }
}

/// Spawner backed by a [`FakeHub`].
#[derive(Debug, Clone)]
pub(crate) struct FakeSpawner {
    hub: FakeHub,
    installed: Vec<String>,
    fail_labels: Vec<String>,
}

impl FakeSpawner {
    pub(crate) fn new(hub: FakeHub) -> Self {
        Self {
            hub,
            installed: Vec::new(),
            fail_labels: Vec::new(),
        }
    }

    pub(crate) fn with_installed(mut self, program: &str) -> Self {
        self.installed.push(program.to_string());
        self
    }

    pub(crate) fn failing(mut self, label: &str) -> Self {
        self.fail_labels.push(label.to_string());
        self
    }
}

impl Spawn for FakeSpawner {
    fn spawn(&self, label: &str, command: &CommandSpec) -> io::Result<ProcessHandle> {
        if self.fail_labels.iter().any(|l| l == label) {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("{} not found", command.program)));
        }
        let handle = self.hub.fake_process(label);
        self.hub.register_spawned(label, command);
        Ok(handle)
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.installed
            .iter()
            .any(|p| p == program)
            .then(|| PathBuf::from(format!("/usr/bin/{program}")))
    }
}

/// Registry client backed by a [`FakeHub`].
#[derive(Debug)]
pub(crate) struct FakeClient {
    hub: FakeHub,
    endpoint: String,
    closed: AtomicBool,
}

impl FakeClient {
    pub(crate) fn new(hub: FakeHub) -> Self {
        Self::with_endpoint(hub, "127.0.0.1:10101")
    }

    fn with_endpoint(hub: FakeHub, endpoint: &str) -> Self {
        Self {
            hub,
            endpoint: endpoint.to_string(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RegistryError::Closed)
        } else {
            Ok(())
        }
    }
}

impl RegistryClient for FakeClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn engine_ids(&self) -> RegistryFuture<'_, Vec<u32>> {
        Box::pin(async move {
            self.ensure_open()?;
            Ok(self.hub.lock().engine_ids.clone())
        })
    }

    fn shutdown(&self, targets: ShutdownTargets, include_hub: bool) -> RegistryFuture<'_, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            let target = match targets {
                ShutdownTargets::All => "all",
            };
            self.hub.record(format!("shutdown({target}, hub={include_hub})"));
            let mut state = self.hub.lock();
            if state.shutdown_fails {
                return Err(RegistryError::Status {
                    method: "POST".to_string(),
                    path: "/registry/shutdown".to_string(),
                    status: 500,
                });
            }
            for p in state.processes.iter_mut().filter(|p| !p.stuck) {
                p.alive = false;
            }
            state.engine_ids.clear();
            Ok(())
        })
    }

    fn become_overlay(&self, nthreads: u32) -> RegistryFuture<'_, OverlayInfo> {
        Box::pin(async move {
            self.ensure_open()?;
            self.hub.record("overlay/start");
            let available = self.hub.lock().overlay_available;
            if !available {
                return Err(RegistryError::OverlayUnavailable(format!(
                    "cannot start scheduler with {nthreads} threads"
                )));
            }
            Ok(OverlayInfo {
                scheduler_address: "tcp://127.0.0.1:8786".to_string(),
                dashboard_address: Some("http://127.0.0.1:8787".to_string()),
            })
        })
    }

    fn stop_overlay(&self) -> RegistryFuture<'_, ()> {
        Box::pin(async move {
            self.ensure_open()?;
            self.hub.record("overlay/stop");
            Ok(())
        })
    }

    fn close(&self) -> RegistryFuture<'_, ()> {
        Box::pin(async move {
            self.hub.record("close");
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Connector backed by a [`FakeHub`]. Unreachable hubs time out.
#[derive(Debug, Clone)]
pub(crate) struct FakeConnector {
    hub: FakeHub,
}

impl FakeConnector {
    pub(crate) fn new(hub: FakeHub) -> Self {
        Self { hub }
    }
}

impl RegistryConnector for FakeConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a str,
        timeout: Duration,
    ) -> RegistryFuture<'a, Box<dyn RegistryClient>> {
        Box::pin(async move {
            let reachable = self.hub.lock().reachable;
            if !reachable {
                tokio::time::sleep(timeout).await;
                return Err(RegistryError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout,
                });
            }
            self.hub.record("connect");
            Ok(Box::new(FakeClient::with_endpoint(self.hub.clone(), endpoint)) as Box<dyn RegistryClient>)
        })
    }
}
