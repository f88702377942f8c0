//! Metrics registry.
//!
//! - Counters only (no gauges, no histograms); peak RSS is the one
//!   exception, recorded by the resource monitor for observability.
//! - Monotonic increase, reset only on process start.
//! - Thread-safe via atomics, no locking.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    // Dispatcher / admission control
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    timeout_requests: AtomicU64,
    queue_full_rejections: AtomicU64,
    reads_routed_replica: AtomicU64,
    reads_routed_primary: AtomicU64,
    consistency_pins: AtomicU64,

    // WAL engine
    wal_writes_appended: AtomicU64,
    wal_entries_synced: AtomicU64,
    wal_entries_failed: AtomicU64,
    wal_entries_obsoleted: AtomicU64,
    wal_sync_cycles: AtomicU64,
    deletion_conversions: AtomicU64,

    // Transaction safety log
    transactions_logged: AtomicU64,
    transactions_completed: AtomicU64,
    transactions_recovered: AtomicU64,
    transactions_abandoned: AtomicU64,

    // Recovery coordinator
    recovery_runs: AtomicU64,
    collections_reconciled: AtomicU64,

    // Persistence store
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
    pool_direct_fallbacks: AtomicU64,

    // Resource monitor (the one gauge-like exception: a high-water mark)
    peak_rss_bytes: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_total_requests(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_successful_requests(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_failed_requests(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_timeout_requests(&self) {
        self.timeout_requests.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_queue_full_rejections(&self) {
        self.queue_full_rejections.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_reads_routed_replica(&self) {
        self.reads_routed_replica.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_reads_routed_primary(&self) {
        self.reads_routed_primary.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_consistency_pins(&self) {
        self.consistency_pins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_wal_writes_appended(&self) {
        self.wal_writes_appended.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_wal_entries_synced(&self) {
        self.wal_entries_synced.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_wal_entries_failed(&self) {
        self.wal_entries_failed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_wal_entries_obsoleted(&self) {
        self.wal_entries_obsoleted.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_wal_sync_cycles(&self) {
        self.wal_sync_cycles.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_deletion_conversions(&self) {
        self.deletion_conversions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_transactions_logged(&self) {
        self.transactions_logged.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_transactions_completed(&self) {
        self.transactions_completed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_transactions_recovered(&self) {
        self.transactions_recovered.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_transactions_abandoned(&self) {
        self.transactions_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_recovery_runs(&self) {
        self.recovery_runs.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_collections_reconciled(&self) {
        self.collections_reconciled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_pool_hits(&self) {
        self.pool_hits.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_pool_misses(&self) {
        self.pool_misses.fetch_add(1, Ordering::Relaxed);
    }
    pub fn incr_pool_direct_fallbacks(&self) {
        self.pool_direct_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rss(&self, bytes: u64) {
        self.peak_rss_bytes.fetch_max(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            timeout_requests: self.timeout_requests.load(Ordering::Relaxed),
            queue_full_rejections: self.queue_full_rejections.load(Ordering::Relaxed),
            reads_routed_replica: self.reads_routed_replica.load(Ordering::Relaxed),
            reads_routed_primary: self.reads_routed_primary.load(Ordering::Relaxed),
            consistency_pins: self.consistency_pins.load(Ordering::Relaxed),
            wal_writes_appended: self.wal_writes_appended.load(Ordering::Relaxed),
            wal_entries_synced: self.wal_entries_synced.load(Ordering::Relaxed),
            wal_entries_failed: self.wal_entries_failed.load(Ordering::Relaxed),
            wal_entries_obsoleted: self.wal_entries_obsoleted.load(Ordering::Relaxed),
            wal_sync_cycles: self.wal_sync_cycles.load(Ordering::Relaxed),
            deletion_conversions: self.deletion_conversions.load(Ordering::Relaxed),
            transactions_logged: self.transactions_logged.load(Ordering::Relaxed),
            transactions_completed: self.transactions_completed.load(Ordering::Relaxed),
            transactions_recovered: self.transactions_recovered.load(Ordering::Relaxed),
            transactions_abandoned: self.transactions_abandoned.load(Ordering::Relaxed),
            recovery_runs: self.recovery_runs.load(Ordering::Relaxed),
            collections_reconciled: self.collections_reconciled.load(Ordering::Relaxed),
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.pool_misses.load(Ordering::Relaxed),
            pool_direct_fallbacks: self.pool_direct_fallbacks.load(Ordering::Relaxed),
            peak_rss_bytes: self.peak_rss_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the registry, serializable for `/metrics`.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeout_requests: u64,
    pub queue_full_rejections: u64,
    pub reads_routed_replica: u64,
    pub reads_routed_primary: u64,
    pub consistency_pins: u64,
    pub wal_writes_appended: u64,
    pub wal_entries_synced: u64,
    pub wal_entries_failed: u64,
    pub wal_entries_obsoleted: u64,
    pub wal_sync_cycles: u64,
    pub deletion_conversions: u64,
    pub transactions_logged: u64,
    pub transactions_completed: u64,
    pub transactions_recovered: u64,
    pub transactions_abandoned: u64,
    pub recovery_runs: u64,
    pub collections_reconciled: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
    pub pool_direct_fallbacks: u64,
    pub peak_rss_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let m = MetricsRegistry::new();
        assert_eq!(m.snapshot().total_requests, 0);
        m.incr_total_requests();
        m.incr_total_requests();
        assert_eq!(m.snapshot().total_requests, 2);
    }

    #[test]
    fn peak_rss_is_a_high_water_mark() {
        let m = MetricsRegistry::new();
        m.record_rss(100);
        m.record_rss(50);
        m.record_rss(200);
        assert_eq!(m.snapshot().peak_rss_bytes, 200);
    }
}
