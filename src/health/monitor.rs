//! Health monitor loop.
//!
//! Probes `GET /collections` on each instance every `check_interval`.
//! An instance is healthy iff the response is 200 and parses as a JSON
//! array (enforced inside `BackendClient::probe_healthy`). On a
//! healthy->unhealthy transition we log; on unhealthy->healthy we launch
//! the coordinated recovery sequence in a background task.
//!
//! `check_realtime` exists separately from the cached flag for callers
//! that cannot tolerate up-to-`check_interval`-seconds staleness — the
//! write path in particular, where routing on a stale cached flag is a
//! "timing gap failure".

use std::sync::Arc;
use std::time::Duration;

use crate::instance::{InstanceDescriptor, InstanceName};
use crate::recovery::coordinator::RecoveryCoordinator;
use crate::backend::BackendClient;
use crate::observability::Logger;

pub struct HealthMonitor {
    primary: Arc<InstanceDescriptor>,
    replica: Arc<InstanceDescriptor>,
    backend: Arc<BackendClient>,
    check_interval: Duration,
    recovery: Arc<RecoveryCoordinator>,
}

impl HealthMonitor {
    pub fn new(
        primary: Arc<InstanceDescriptor>,
        replica: Arc<InstanceDescriptor>,
        backend: Arc<BackendClient>,
        check_interval: Duration,
        recovery: Arc<RecoveryCoordinator>,
    ) -> Self {
        Self {
            primary,
            replica,
            backend,
            check_interval,
            recovery,
        }
    }

    pub fn instance(&self, name: InstanceName) -> &Arc<InstanceDescriptor> {
        match name {
            InstanceName::Primary => &self.primary,
            InstanceName::Replica => &self.replica,
        }
    }

    /// Real-time probe bypassing the cached flag. Used by the dispatcher
    /// on the write path, where a stale health flag risks routing into an
    /// instance that has already gone down.
    pub async fn check_realtime(&self, name: InstanceName, timeout: Duration) -> bool {
        let inst = self.instance(name);
        self.backend.probe_healthy(&inst.base_url, timeout).await
    }

    /// Run the probe loop forever. Intended to be spawned as a single
    /// long-lived background task; cancellable via the passed token.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.check_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.probe_once(InstanceName::Primary).await;
                    self.probe_once(InstanceName::Replica).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn probe_once(&self, name: InstanceName) {
        let inst = self.instance(name);
        let was_healthy = inst.is_healthy();
        let healthy = self
            .backend
            .probe_healthy(&inst.base_url, Duration::from_secs(5))
            .await;

        inst.set_healthy(healthy, if healthy { None } else { Some("probe failed".to_string()) });

        if was_healthy && !healthy {
            Logger::warn("HEALTH_TRANSITION_DOWN", &[("instance", name.as_str())]);
        } else if !was_healthy && healthy {
            Logger::info("HEALTH_TRANSITION_UP", &[("instance", name.as_str())]);
            let recovery = self.recovery.clone();
            tokio::spawn(async move {
                recovery.run_recovery(name).await;
            });
        }
    }
}
