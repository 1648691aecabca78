//! Registry client traits.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RegistryResult;

/// Boxed future returned by registry calls.
pub type RegistryFuture<'a, T> = Pin<Box<dyn Future<Output = RegistryResult<T>> + Send + 'a>>;

/// Which engines a shutdown directive addresses. The lifecycle only ever
/// stops the whole pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTargets {
    All,
}

impl ShutdownTargets {
    pub fn to_json(self) -> serde_json::Value {
        match self {
            ShutdownTargets::All => serde_json::Value::from("all"),
        }
    }
}

/// Connection details of an activated overlay scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayInfo {
    pub scheduler_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_address: Option<String>,
}

/// An open connection to the coordinator's worker registry.
pub trait RegistryClient: Send + Sync + fmt::Debug {
    /// `host:port` this client talks to.
    fn endpoint(&self) -> &str;

    /// Ids of every engine currently registered.
    fn engine_ids(&self) -> RegistryFuture<'_, Vec<u32>>;

    /// Order `targets` (and the hub itself when `include_hub`) to exit.
    fn shutdown(&self, targets: ShutdownTargets, include_hub: bool) -> RegistryFuture<'_, ()>;

    /// Convert the engine pool into a task-scheduling overlay.
    fn become_overlay(&self, nthreads: u32) -> RegistryFuture<'_, OverlayInfo>;

    /// Tear the overlay down, returning engines to the registry.
    fn stop_overlay(&self) -> RegistryFuture<'_, ()>;

    /// Release the connection. Later calls fail with `Closed`.
    fn close(&self) -> RegistryFuture<'_, ()>;
}

/// Opens registry clients. Injected for testability.
pub trait RegistryConnector: Send + Sync {
    /// Connect to `endpoint`, retrying until `timeout` elapses.
    fn connect<'a>(
        &'a self,
        endpoint: &'a str,
        timeout: Duration,
    ) -> RegistryFuture<'a, Box<dyn RegistryClient>>;
}
