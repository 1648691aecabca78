//! Process handles and engine groups.
//!
//! A `ProcessHandle` wraps anything implementing [`ProcessControl`]: real
//! children in production, scripted fakes in tests. Engine groups carry
//! their shape explicitly so callers never have to guess whether they hold
//! one launcher process or one process per engine.

use std::fmt;
use std::io;

use tracing::debug;

/// Exit state of a process at the moment it was queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    /// Exited; `None` when terminated by a signal.
    Exited(Option<i32>),
}

impl ProcessStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessStatus::Exited(_))
    }
}

/// Low-level control over one spawned process. Injected for testability.
pub trait ProcessControl: Send + fmt::Debug {
    /// OS process id, if still known.
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit-status query.
    fn try_status(&mut self) -> io::Result<ProcessStatus>;

    /// Ask the process to exit. Must be a no-op once it has exited.
    fn terminate(&mut self) -> io::Result<()>;
}

/// An owned, labelled reference to a spawned process.
pub struct ProcessHandle {
    label: String,
    control: Box<dyn ProcessControl>,
}

impl ProcessHandle {
    pub fn new(label: impl Into<String>, control: Box<dyn ProcessControl>) -> Self {
        Self {
            label: label.into(),
            control,
        }
    }

    /// Human-readable role, e.g. `coordinator` or `engine-3`.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.control.pid()
    }

    pub fn try_status(&mut self) -> io::Result<ProcessStatus> {
        self.control.try_status()
    }

    /// True unless the process has been observed to exit.
    ///
    /// A failed status query counts as alive: we cannot prove it exited.
    pub fn is_alive(&mut self) -> bool {
        match self.control.try_status() {
            Ok(status) => !status.is_terminal(),
            Err(e) => {
                debug!(label = %self.label, error = %e, "status query failed");
                true
            }
        }
    }

    pub fn terminate(&mut self) -> io::Result<()> {
        debug!(label = %self.label, pid = ?self.pid(), "terminating process");
        self.control.terminate()
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("label", &self.label)
            .field("pid", &self.control.pid())
            .finish()
    }
}

/// The engine side of a cluster.
#[derive(Debug)]
pub enum EngineGroup {
    /// One launcher process (srun/mpirun) owning every engine.
    Single(ProcessHandle),
    /// One process per engine.
    Multiple(Vec<ProcessHandle>),
}

impl EngineGroup {
    /// Number of OS processes held, not number of engines.
    pub fn process_count(&self) -> usize {
        match self {
            EngineGroup::Single(_) => 1,
            EngineGroup::Multiple(handles) => handles.len(),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &ProcessHandle> + '_> {
        match self {
            EngineGroup::Single(h) => Box::new(std::iter::once(h)),
            EngineGroup::Multiple(handles) => Box::new(handles.iter()),
        }
    }

    pub fn iter_mut(&mut self) -> Box<dyn Iterator<Item = &mut ProcessHandle> + '_> {
        match self {
            EngineGroup::Single(h) => Box::new(std::iter::once(h)),
            EngineGroup::Multiple(handles) => Box::new(handles.iter_mut()),
        }
    }

    pub fn pids(&self) -> Vec<u32> {
        self.iter().filter_map(ProcessHandle::pid).collect()
    }
}

/// Every process spawned for one session.
///
/// Filled in as spawning progresses, so whatever exists at the moment of a
/// failure is still owned by the session and can be reclaimed.
#[derive(Debug, Default)]
pub struct SpawnedProcesses {
    pub coordinator: Option<ProcessHandle>,
    pub engines: Option<EngineGroup>,
}

impl SpawnedProcesses {
    pub fn is_empty(&self) -> bool {
        self.coordinator.is_none()
            && self
                .engines
                .as_ref()
                .is_none_or(|group| group.process_count() == 0)
    }

    /// Total OS processes held.
    pub fn process_count(&self) -> usize {
        usize::from(self.coordinator.is_some())
            + self.engines.as_ref().map_or(0, EngineGroup::process_count)
    }

    /// Engines first, then the coordinator.
    pub fn handles_mut(&mut self) -> impl Iterator<Item = &mut ProcessHandle> {
        self.engines
            .iter_mut()
            .flat_map(|group| group.iter_mut())
            .chain(self.coordinator.iter_mut())
    }

    /// Labels of processes not yet observed to exit.
    pub fn alive_labels(&mut self) -> Vec<String> {
        self.handles_mut()
            .filter_map(|h| h.is_alive().then(|| h.label().to_string()))
            .collect()
    }
}
