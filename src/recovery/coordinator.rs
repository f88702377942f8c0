//! Coordinated recovery sequence, triggered by the health monitor on an
//! unhealthy->healthy transition for instance `R`:
//!
//! 1. Drain WAL targeting `R` with a bounded wait (<=120s): poll
//!    pending+retry-eligible counts, sleep 5s per cycle.
//! 2. Buffer a short grace period (~10s) for final replays.
//! 3. Collection reconciliation: for each mapping row where `R`'s UUID is
//!    null but the other side's is not, and no DELETE for that name is
//!    present in the last 10 minutes of WAL, fetch the collection's
//!    metadata from the other instance, recreate on `R` with
//!    `get_or_create`, and populate the mapping.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::BackendClient;
use crate::db::Store;
use crate::instance::{InstanceDescriptor, InstanceName};
use crate::mapping::MappingResolver;
use crate::observability::{Logger, MetricsRegistry};

const DRAIN_MAX_WAIT: Duration = Duration::from_secs(120);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
const GRACE_PERIOD: Duration = Duration::from_secs(10);
const RECENT_DELETE_WINDOW_MINUTES: i64 = 10;

pub struct RecoveryCoordinator {
    store: Arc<Store>,
    mapping: Arc<MappingResolver>,
    backend: Arc<BackendClient>,
    primary: Arc<InstanceDescriptor>,
    replica: Arc<InstanceDescriptor>,
    metrics: Arc<MetricsRegistry>,
}

impl RecoveryCoordinator {
    pub fn new(
        store: Arc<Store>,
        mapping: Arc<MappingResolver>,
        backend: Arc<BackendClient>,
        primary: Arc<InstanceDescriptor>,
        replica: Arc<InstanceDescriptor>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            mapping,
            backend,
            primary,
            replica,
            metrics,
        }
    }

    fn instance(&self, name: InstanceName) -> &Arc<InstanceDescriptor> {
        match name {
            InstanceName::Primary => &self.primary,
            InstanceName::Replica => &self.replica,
        }
    }

    pub async fn run_recovery(&self, recovered: InstanceName) {
        self.metrics.incr_recovery_runs();
        Logger::info("RECOVERY_STARTED", &[("instance", recovered.as_str())]);

        self.drain_wal(recovered).await;
        tokio::time::sleep(GRACE_PERIOD).await;
        self.reconcile_collections(recovered).await;

        Logger::info("RECOVERY_COMPLETE", &[("instance", recovered.as_str())]);
    }

    async fn pending_count(&self, instance: InstanceName) -> i64 {
        let conn = match self.store.get().await {
            Ok(c) => c,
            Err(_) => return 0,
        };
        let row = conn
            .query_one(
                "SELECT COUNT(*) FROM wal_writes \
                 WHERE retry_count < 3 AND status IN ('executed', 'failed') \
                 AND ( \
                    (target_instance = $1 AND (executed_on IS NULL OR executed_on <> $1)) \
                    OR (target_instance = 'both' AND NOT (synced_instances @> to_jsonb($1::text))) \
                 )",
                &[&instance.as_str()],
            )
            .await;
        row.map(|r| r.get::<_, i64>(0)).unwrap_or(0)
    }

    async fn drain_wal(&self, recovered: InstanceName) {
        let deadline = tokio::time::Instant::now() + DRAIN_MAX_WAIT;
        loop {
            let pending = self.pending_count(recovered).await;
            if pending == 0 || tokio::time::Instant::now() >= deadline {
                if pending > 0 {
                    Logger::warn(
                        "RECOVERY_DRAIN_TIMED_OUT",
                        &[("instance", recovered.as_str()), ("pending", &pending.to_string())],
                    );
                }
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    async fn reconcile_collections(&self, recovered: InstanceName) {
        let other = recovered.other();

        let names = match self.mapping.list_incomplete(recovered).await {
            Ok(n) => n,
            Err(_) => return,
        };

        for name in names {
            if self.has_recent_delete(&name).await {
                continue;
            }
            self.reconcile_one(&name, recovered, other).await;
        }
    }

    async fn has_recent_delete(&self, name: &str) -> bool {
        let conn = match self.store.get().await {
            Ok(c) => c,
            Err(_) => return false,
        };
        let row = conn
            .query_opt(
                "SELECT 1 FROM wal_writes WHERE collection_id = $1 AND method = 'DELETE' \
                 AND NOT path LIKE '%/delete' \
                 AND created > NOW() - ($2 || ' minutes')::interval LIMIT 1",
                &[&name, &RECENT_DELETE_WINDOW_MINUTES.to_string()],
            )
            .await;
        matches!(row, Ok(Some(_)))
    }

    async fn reconcile_one(&self, name: &str, recovered: InstanceName, other: InstanceName) {
        let other_inst = self.instance(other);
        let recovered_inst = self.instance(recovered);

        let collections = match self.backend.list_collections(&other_inst.base_url).await {
            Ok(c) => c,
            Err(_) => return,
        };
        let Some(found) = collections.into_iter().find(|c| c.name == name) else {
            return;
        };

        match self
            .backend
            .create_collection(&recovered_inst.base_url, name, &found.metadata, true)
            .await
        {
            Ok((_, info)) => {
                let _ = match recovered {
                    InstanceName::Primary => {
                        self.mapping
                            .create_complete_mapping(name, Some(&info.id), None)
                            .await
                    }
                    InstanceName::Replica => {
                        self.mapping
                            .create_complete_mapping(name, None, Some(&info.id))
                            .await
                    }
                };
                self.metrics.incr_collections_reconciled();
                Logger::info(
                    "RECOVERY_COLLECTION_RECONCILED",
                    &[("name", name), ("instance", recovered.as_str())],
                );
            }
            Err(e) => {
                Logger::warn(
                    "RECOVERY_COLLECTION_RECONCILE_FAILED",
                    &[("name", name), ("error", &e.to_string())],
                );
            }
        }
    }
}
