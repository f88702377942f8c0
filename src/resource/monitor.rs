//! Resource monitor: samples this process's RSS and CPU usage on a fixed
//! period, records the high-water mark, and feeds a memory-pressure
//! fraction to the WAL sync driver so batch sizes shrink before the
//! configured ceiling is hit rather than after.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{get_current_pid, Pid, System};

use crate::observability::{Logger, MetricsRegistry};

const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

pub struct ResourceMonitor {
    max_memory_bytes: u64,
    metrics: Arc<MetricsRegistry>,
    pressure_fraction: Arc<AtomicUsize>,
    pid: Option<Pid>,
}

impl ResourceMonitor {
    pub fn new(max_memory_mb: u64, metrics: Arc<MetricsRegistry>, pressure_fraction: Arc<AtomicUsize>) -> Self {
        Self {
            max_memory_bytes: max_memory_mb * 1024 * 1024,
            metrics,
            pressure_fraction,
            pid: get_current_pid().ok(),
        }
    }

    pub fn pressure_fraction(&self) -> Arc<AtomicUsize> {
        self.pressure_fraction.clone()
    }

    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let Some(pid) = self.pid else {
            Logger::warn("RESOURCE_MONITOR_PID_UNAVAILABLE", &[]);
            return;
        };

        let mut sys = System::new();
        loop {
            sys.refresh_process(pid);
            if let Some(process) = sys.process(pid) {
                let rss_bytes = process.memory();
                self.metrics.record_rss(rss_bytes);

                let fraction = if self.max_memory_bytes > 0 {
                    ((rss_bytes as f64 / self.max_memory_bytes as f64) * 100.0) as usize
                } else {
                    0
                };
                self.pressure_fraction.store(fraction.min(200), Ordering::Relaxed);

                if fraction >= 85 {
                    Logger::warn(
                        "RESOURCE_PRESSURE_HIGH",
                        &[("rss_bytes", &rss_bytes.to_string()), ("pressure_pct", &fraction.to_string())],
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(SAMPLE_INTERVAL) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_fraction_starts_at_zero() {
        let metrics = Arc::new(MetricsRegistry::new());
        let pressure = Arc::new(AtomicUsize::new(0));
        let monitor = ResourceMonitor::new(400, metrics, pressure.clone());
        assert_eq!(monitor.pressure_fraction().load(Ordering::Relaxed), 0);
    }
}
