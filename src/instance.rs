//! Backend instance descriptors.
//!
//! An `InstanceName` is one of the two fixed roles in the cluster. An
//! `InstanceDescriptor` carries the URL, priority, and rolling counters for
//! one instance; it is mutated only by the health monitor (health/priority)
//! and by per-request accounting (counters), never destroyed for the
//! lifetime of the process.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceName {
    Primary,
    Replica,
}

impl InstanceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceName::Primary => "primary",
            InstanceName::Replica => "replica",
        }
    }

    pub fn other(&self) -> InstanceName {
        match self {
            InstanceName::Primary => InstanceName::Replica,
            InstanceName::Replica => InstanceName::Primary,
        }
    }

    pub fn parse(s: &str) -> Option<InstanceName> {
        match s {
            "primary" => Some(InstanceName::Primary),
            "replica" => Some(InstanceName::Replica),
            _ => None,
        }
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A live instance descriptor. Counters are atomics so request-handling
/// tasks can update them without taking a lock; `base_url` and `priority`
/// are effectively immutable after construction, `healthy`/`last_probe`
/// are owned exclusively by the health monitor.
pub struct InstanceDescriptor {
    pub name: InstanceName,
    pub base_url: String,
    pub priority: i32,
    healthy: AtomicBool,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    consecutive_failures: AtomicU64,
    last_probe_unix_ms: AtomicI64,
    last_error: RwLock<Option<String>>,
}

impl InstanceDescriptor {
    pub fn new(name: InstanceName, base_url: impl Into<String>, priority: i32) -> Self {
        Self {
            name,
            base_url: base_url.into(),
            priority,
            healthy: AtomicBool::new(true),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_probe_unix_ms: AtomicI64::new(0),
            last_error: RwLock::new(None),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool, error: Option<String>) {
        self.healthy.store(healthy, Ordering::Release);
        self.last_probe_unix_ms.store(now_ms(), Ordering::Relaxed);
        if let Ok(mut guard) = self.last_error.write() {
            *guard = error;
        }
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.store(0, Ordering::Relaxed);
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Success rate as a fraction in [0, 1]; 1.0 when no requests yet
    /// (an instance with no history is not penalized).
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let ok = self.successful_requests.load(Ordering::Relaxed);
        ok as f64 / total as f64
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            name: self.name.as_str(),
            base_url: self.base_url.clone(),
            priority: self.priority,
            healthy: self.is_healthy(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures(),
            success_rate_pct: self.success_rate() * 100.0,
            last_error: self.last_error.read().ok().and_then(|g| g.clone()),
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Serialize)]
pub struct InstanceSnapshot {
    pub name: &'static str,
    pub base_url: String,
    pub priority: i32,
    pub healthy: bool,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub consecutive_failures: u64,
    pub success_rate_pct: f64,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_flips_role() {
        assert_eq!(InstanceName::Primary.other(), InstanceName::Replica);
        assert_eq!(InstanceName::Replica.other(), InstanceName::Primary);
    }

    #[test]
    fn fresh_instance_is_healthy_with_perfect_success_rate() {
        let inst = InstanceDescriptor::new(InstanceName::Primary, "http://p", 100);
        assert!(inst.is_healthy());
        assert_eq!(inst.success_rate(), 1.0);
    }

    #[test]
    fn consecutive_failures_reset_on_success() {
        let inst = InstanceDescriptor::new(InstanceName::Replica, "http://r", 80);
        inst.record_request(false);
        inst.record_request(false);
        assert_eq!(inst.consecutive_failures(), 2);
        inst.record_request(true);
        assert_eq!(inst.consecutive_failures(), 0);
        assert!(inst.success_rate() > 0.3 && inst.success_rate() < 0.4);
    }
}
