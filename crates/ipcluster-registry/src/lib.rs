//! ipcluster-registry: client for the coordinator's worker registry.
//!
//! The lifecycle manager only needs a handful of registry calls: reach the
//! coordinator, count registered engines, order a shutdown, and turn the
//! engine pool into a task-scheduling overlay and back. Those calls are
//! modelled by [`RegistryClient`]; [`RegistryConnector`] opens clients.
//! [`HttpRegistryConnector`] speaks the coordinator's HTTP/JSON endpoint.
//!
//! # Protocol
//!
//! ```text
//! GET  /registry/ping       → 2xx once the hub is listening
//! GET  /registry/engines    → {"ids": [0, 1, ...]}
//! POST /registry/shutdown   ← {"targets": "all", "hub": true}
//! POST /overlay/start       ← {"nthreads": n} → {"scheduler_address": ..., "dashboard_address": ...}
//! POST /overlay/stop
//! ```

pub mod client;
pub mod error;
pub mod http;

pub use client::{OverlayInfo, RegistryClient, RegistryConnector, RegistryFuture, ShutdownTargets};
pub use error::{RegistryError, RegistryResult};
pub use self::http::{HttpRegistryClient, HttpRegistryConnector};
