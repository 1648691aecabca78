//! ipcluster-lifecycle: start and stop one coordinator/engine cluster.
//!
//! # Architecture
//!
//! ```text
//! ClusterController ──owns──► ClusterSession (state + resources)
//!   │
//!   ├─ start: ProcessLauncher ─► ReadinessWaiter ─► SecondaryOverlay::activate
//!   │           (spawn)           (connect, then count engines)
//!   │
//!   └─ stop:  SecondaryOverlay::deactivate ─► ShutdownCoordinator
//!                                              (directive, then poll exits)
//! ```
//!
//! Failures during start are rolled back before they reach the caller.
//! Shutdown that leaves processes behind is reported in [`StopReport`],
//! not raised as an error.

pub mod controller;
pub mod error;
pub mod overlay;
pub mod readiness;
pub mod session;
pub mod shortcuts;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{ClusterController, StartReport, StatusReport, StopReport};
pub use error::{LifecycleError, LifecycleResult};
pub use overlay::{OverlayHandle, OverlayStatus, SecondaryOverlay};
pub use readiness::{Readiness, ReadinessWaiter};
pub use session::{ClusterSession, SessionResources};
pub use shortcuts::{SESSION_SHORTCUTS, ShortcutRegistry, ShortcutScope};
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome};
