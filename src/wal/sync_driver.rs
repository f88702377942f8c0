//! Background loop that drives WAL replay at an adaptive cadence across a
//! worker pool, fanning batches out to `max_workers` partitions that are
//! hash-keyed by collection name so that entries for the same collection
//! are always replayed by the same worker and in the chronological order
//! they were selected in — satisfying the ordering requirement without a
//! dedicated per-collection lock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ProxyConfig;
use crate::instance::{InstanceDescriptor, InstanceName};
use crate::observability::{Logger, MetricsRegistry};

use super::engine::WalEngine;
use super::entry::WalEntry;
use super::replay::WalReplayer;

pub struct SyncDriver {
    engine: Arc<WalEngine>,
    replayer: Arc<WalReplayer>,
    primary: Arc<InstanceDescriptor>,
    replica: Arc<InstanceDescriptor>,
    metrics: Arc<MetricsRegistry>,
    config: ProxyConfig,
    memory_pressure_fraction: Arc<AtomicUsize>,
}

impl SyncDriver {
    pub fn new(
        engine: Arc<WalEngine>,
        replayer: Arc<WalReplayer>,
        primary: Arc<InstanceDescriptor>,
        replica: Arc<InstanceDescriptor>,
        metrics: Arc<MetricsRegistry>,
        config: ProxyConfig,
        memory_pressure_fraction: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            engine,
            replayer,
            primary,
            replica,
            metrics,
            config,
            memory_pressure_fraction,
        }
    }

    fn instance(&self, name: InstanceName) -> &Arc<InstanceDescriptor> {
        match name {
            InstanceName::Primary => &self.primary,
            InstanceName::Replica => &self.replica,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            let pending = self.engine.pending_count().await.unwrap_or(0);
            self.metrics.incr_wal_sync_cycles();

            if self.primary.is_healthy() {
                self.sync_target(InstanceName::Primary).await;
            }
            if self.replica.is_healthy() {
                self.sync_target(InstanceName::Replica).await;
            }

            let interval = self.adaptive_interval(pending);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    fn adaptive_interval(&self, pending: i64) -> Duration {
        let base = self.config.sync_interval();
        if pending > 100 {
            base / 4
        } else if pending == 0 {
            base * 2
        } else {
            base
        }
    }

    async fn sync_target(&self, target: InstanceName) {
        let target_inst = self.instance(target);
        let target_struggling =
            target_inst.consecutive_failures() >= 3 || target_inst.success_rate() < 0.8;
        let pressure = self.memory_pressure_fraction.load(Ordering::Relaxed) as f64 / 100.0;
        let batch_size = self.engine.adaptive_batch_size(pressure, target_struggling);

        let batches = match self
            .engine
            .next_batches(target, batch_size, self.config.max_batch_bytes)
            .await
        {
            Ok(b) => b,
            Err(e) => {
                Logger::warn("WAL_SYNC_SELECT_FAILED", &[("error", &e.to_string())]);
                return;
            }
        };

        let entries: Vec<WalEntry> = batches.into_iter().flatten().collect();
        if entries.is_empty() {
            return;
        }

        let worker_count = self.config.max_workers.max(1);
        let mut partitions: Vec<Vec<WalEntry>> = (0..worker_count).map(|_| Vec::new()).collect();
        for entry in entries {
            let idx = partition_for(&entry, worker_count);
            partitions[idx].push(entry);
        }

        let primary_healthy = self.primary.is_healthy();
        let target_base_url = target_inst.base_url.clone();
        let mut handles = Vec::new();

        for partition in partitions {
            if partition.is_empty() {
                continue;
            }
            let replayer = self.replayer.clone();
            let base_url = target_base_url.clone();
            let target_inst = target_inst.clone();
            handles.push(tokio::spawn(async move {
                for entry in partition {
                    let ok = replayer.replay_entry(&entry, target, &base_url, primary_healthy).await;
                    target_inst.record_request(ok);
                }
            }));
        }

        for h in handles {
            let _ = h.await;
        }
    }
}

fn partition_for(entry: &WalEntry, worker_count: usize) -> usize {
    let key = entry.collection_id.clone().unwrap_or_else(|| entry.path.clone());
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % worker_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::entry::{TargetInstance, WalStatus};
    use serde_json::json;

    fn entry_for(collection: &str) -> WalEntry {
        WalEntry {
            write_id: uuid::Uuid::new_v4(),
            method: "POST".to_string(),
            original_method: None,
            path: format!("/api/v2/tenants/default_tenant/databases/default_database/collections/{collection}/add"),
            body: vec![],
            headers: json!({}),
            target_instance: TargetInstance::Both,
            executed_on: None,
            status: WalStatus::Pending,
            synced_instances: vec![],
            collection_id: Some(collection.to_string()),
            retry_count: 0,
            priority: 0,
            error_message: None,
            original_body: None,
            conversion_type: None,
        }
    }

    #[test]
    fn same_collection_always_partitions_to_same_worker() {
        let a1 = entry_for("COL1");
        let a2 = entry_for("COL1");
        assert_eq!(partition_for(&a1, 4), partition_for(&a2, 4));
    }

    #[test]
    fn partition_stays_in_bounds() {
        let e = entry_for("COL_X");
        for workers in 1..8 {
            assert!(partition_for(&e, workers) < workers);
        }
    }
}
