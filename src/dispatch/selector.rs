//! Health-aware instance selection for the write and read paths.
//!
//! Writes never trust the cached health flag — a stale flag up to
//! `check_interval` seconds old risks a "timing gap failure" where the
//! proxy forwards to an instance that has already gone down. Reads tolerate
//! the cached flag via `check_realtime` verification of the sampled choice
//! only, since a failed read simply fails over rather than risking data loss.

use std::time::Duration;

use rand::Rng;

use crate::health::HealthMonitor;
use crate::instance::InstanceName;

/// Writes: try primary in real time, fail over to replica in real time,
/// else no healthy instance.
pub async fn select_write_instance(health: &HealthMonitor, timeout: Duration) -> Option<InstanceName> {
    if health.check_realtime(InstanceName::Primary, timeout).await {
        return Some(InstanceName::Primary);
    }
    if health.check_realtime(InstanceName::Replica, timeout).await {
        return Some(InstanceName::Replica);
    }
    None
}

/// Reads: sample `read_replica_ratio` for a preferred instance, verify it
/// in real time, and fail over to the other on failure.
pub async fn select_read_instance(
    health: &HealthMonitor,
    timeout: Duration,
    read_replica_ratio: f64,
) -> Option<InstanceName> {
    let sample: f64 = rand::thread_rng().gen_range(0.0..1.0);
    let preferred = if sample < read_replica_ratio {
        InstanceName::Replica
    } else {
        InstanceName::Primary
    };

    if health.check_realtime(preferred, timeout).await {
        return Some(preferred);
    }
    let other = preferred.other();
    if health.check_realtime(other, timeout).await {
        return Some(other);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_of_zero_always_prefers_primary_direction() {
        // Sanity check on the comparison direction only; sampling itself
        // is exercised indirectly via select_read_instance in higher-level
        // tests that stub HealthMonitor's backend.
        let sample = 0.5;
        let ratio = 0.0;
        let preferred = if sample < ratio { InstanceName::Replica } else { InstanceName::Primary };
        assert_eq!(preferred, InstanceName::Primary);
    }
}
