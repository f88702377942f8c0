//! Admission control: a bounded semaphore of size `max_concurrent`
//! fronted by a bounded queue. A permit acquisition that cannot complete
//! within `request_timeout` is a 503 with a retry hint; a request that
//! cannot even enter the queue is rejected immediately.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ProxyError, ProxyResult};
use crate::observability::MetricsRegistry;

pub struct AdmissionControl {
    semaphore: Arc<Semaphore>,
    queue_size: usize,
    queued: AtomicUsize,
    timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

pub struct AdmissionGuard {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionControl {
    pub fn new(max_concurrent: usize, queue_size: usize, timeout: Duration, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            queue_size,
            queued: AtomicUsize::new(0),
            timeout,
            metrics,
        }
    }

    /// Acquire a permit, queueing if the semaphore is currently exhausted.
    /// Rejects immediately if the queue is already full; times out after
    /// `request_timeout` if a permit never becomes free.
    pub async fn acquire(&self) -> ProxyResult<AdmissionGuard> {
        if self.semaphore.available_permits() == 0 {
            let prev = self.queued.fetch_add(1, Ordering::AcqRel);
            if prev >= self.queue_size {
                self.queued.fetch_sub(1, Ordering::AcqRel);
                self.metrics.incr_queue_full_rejections();
                return Err(ProxyError::AdmissionRejected);
            }

            let result = tokio::time::timeout(self.timeout, self.semaphore.clone().acquire_owned()).await;
            self.queued.fetch_sub(1, Ordering::AcqRel);

            return match result {
                Ok(Ok(permit)) => Ok(AdmissionGuard { _permit: permit }),
                Ok(Err(_)) => Err(ProxyError::AdmissionRejected),
                Err(_) => {
                    self.metrics.incr_timeout_requests();
                    Err(ProxyError::AdmissionTimeout)
                }
            };
        }

        match tokio::time::timeout(self.timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(AdmissionGuard { _permit: permit }),
            Ok(Err(_)) => Err(ProxyError::AdmissionRejected),
            Err(_) => {
                self.metrics.incr_timeout_requests();
                Err(ProxyError::AdmissionTimeout)
            }
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_capacity_then_queues() {
        let metrics = Arc::new(MetricsRegistry::new());
        let admission = AdmissionControl::new(2, 1, Duration::from_millis(200), metrics);

        let g1 = admission.acquire().await.unwrap();
        let g2 = admission.acquire().await.unwrap();

        // Capacity exhausted but one queue slot remains; this should
        // eventually admit once a permit is released.
        let admission = Arc::new(admission);
        let admission2 = admission.clone();
        let waiter = tokio::spawn(async move { admission2.acquire().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(g1);
        let g3 = waiter.await.unwrap();
        assert!(g3.is_ok());
        drop(g2);
        drop(g3);
    }

    #[tokio::test]
    async fn rejects_when_queue_is_full() {
        let metrics = Arc::new(MetricsRegistry::new());
        let admission = Arc::new(AdmissionControl::new(1, 0, Duration::from_millis(500), metrics));

        let _g1 = admission.acquire().await.unwrap();
        let admission2 = admission.clone();
        let waiter = tokio::spawn(async move { admission2.acquire().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = admission.acquire().await;
        assert!(matches!(second, Err(ProxyError::AdmissionRejected)));
        waiter.abort();
    }

    #[tokio::test]
    async fn times_out_when_no_permit_frees_up() {
        let metrics = Arc::new(MetricsRegistry::new());
        let admission = AdmissionControl::new(1, 1, Duration::from_millis(50), metrics);
        let _g1 = admission.acquire().await.unwrap();
        let result = admission.acquire().await;
        assert!(matches!(result, Err(ProxyError::AdmissionTimeout)));
    }
}
