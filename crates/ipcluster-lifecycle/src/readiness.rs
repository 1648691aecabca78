//! Two-phase readiness wait.
//!
//! Phase 1 (connect): open a registry client to the coordinator within
//! `connect_timeout`. Failing here means the coordinator is unreachable.
//!
//! Phase 2 (registration): poll the client until exactly `num_engines`
//! distinct engines are registered, within `registration_timeout`.
//! Failing here means the transport works but the engines never showed up.

use std::collections::BTreeSet;
use std::time::Duration;

use ipcluster_core::config::{MAX_SETTING_DURATION, ReadinessSettings};
use ipcluster_registry::{RegistryClient, RegistryConnector};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, LifecycleResult};

/// Outcome of a successful readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub engine_ids: Vec<u32>,
    /// Time spent in the registration phase.
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    connect_timeout: Duration,
    registration_timeout: Duration,
    poll_interval: Duration,
}

impl ReadinessWaiter {
    /// Budgets above `MAX_SETTING_DURATION` are clamped to it.
    pub fn new(settings: &ReadinessSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout.min(MAX_SETTING_DURATION),
            registration_timeout: settings.registration_timeout.min(MAX_SETTING_DURATION),
            poll_interval: settings.poll_interval.min(MAX_SETTING_DURATION),
        }
    }

    /// Run both phases. The client from phase 1 is stored in `client_slot`
    /// as soon as it exists so the caller can close it on rollback.
    pub async fn wait(
        &self,
        connector: &dyn RegistryConnector,
        endpoint: &str,
        num_engines: u32,
        client_slot: &mut Option<Box<dyn RegistryClient>>,
    ) -> LifecycleResult<Readiness> {
        let client = client_slot.insert(self.connect(connector, endpoint).await?);
        self.wait_for_engines(client.as_ref(), num_engines).await
    }

    /// Phase 1: reach the coordinator.
    pub async fn connect(
        &self,
        connector: &dyn RegistryConnector,
        endpoint: &str,
    ) -> LifecycleResult<Box<dyn RegistryClient>> {
        debug!(%endpoint, timeout = ?self.connect_timeout, "connecting to registry");
        match connector.connect(endpoint, self.connect_timeout).await {
            Ok(client) => Ok(client),
            Err(e) if e.is_timeout() => {
                warn!(%endpoint, timeout = ?self.connect_timeout, "registry connection timed out");
                Err(LifecycleError::ConnectionTimeout {
                    endpoint: endpoint.to_string(),
                    timeout: self.connect_timeout,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Phase 2: wait until exactly `num_engines` distinct engines registered.
    ///
    /// Registry errors while polling are treated as transient until the
    /// deadline.
    pub async fn wait_for_engines(
        &self,
        client: &dyn RegistryClient,
        num_engines: u32,
    ) -> LifecycleResult<Readiness> {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.registration_timeout)
            .unwrap_or_else(|| started + MAX_SETTING_DURATION);
        let expected = num_engines as usize;
        let mut registered = 0usize;

        loop {
            match client.engine_ids().await {
                Ok(ids) => {
                    let distinct: BTreeSet<u32> = ids.into_iter().collect();
                    registered = distinct.len();
                    debug!(
                        registered,
                        expected,
                        elapsed_secs = started.elapsed().as_secs(),
                        "waiting for engines"
                    );
                    if registered == expected {
                        let elapsed = started.elapsed();
                        info!(num_engines, ?elapsed, "cluster is ready");
                        return Ok(Readiness {
                            engine_ids: distinct.into_iter().collect(),
                            elapsed,
                        });
                    }
                }
                Err(e) => debug!(error = %e, "engine count query failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }

        warn!(
            registered,
            expected,
            timeout = ?self.registration_timeout,
            "engines did not register in time"
        );
        Err(LifecycleError::EngineTimeout {
            expected: num_engines,
            registered,
            timeout: self.registration_timeout,
        })
    }
}
