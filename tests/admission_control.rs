//! Admission-control boundary behavior: exactly `max_concurrent` requests
//! in flight, the `(max+1)`-th waits or times out (§8 boundary
//! behaviors; scenario 4 in the testable-properties section).

use std::sync::Arc;
use std::time::Duration;

use vdb_proxy::dispatch::AdmissionControl;
use vdb_proxy::observability::MetricsRegistry;

#[tokio::test]
async fn third_request_over_capacity_times_out_while_two_are_admitted() {
    let metrics = Arc::new(MetricsRegistry::new());
    let admission = Arc::new(AdmissionControl::new(2, 0, Duration::from_millis(200), metrics.clone()));

    let g1 = admission.acquire().await.expect("first request admitted");
    let g2 = admission.acquire().await.expect("second request admitted");
    assert_eq!(admission.available_permits(), 0);

    let start = std::time::Instant::now();
    let third = admission.acquire().await;
    let elapsed = start.elapsed();

    assert!(third.is_err(), "third request must not be admitted while two are in flight");
    assert!(elapsed < Duration::from_millis(400), "timeout should fire close to the configured bound");

    drop(g1);
    drop(g2);
}

#[tokio::test]
async fn a_released_permit_admits_a_queued_waiter() {
    let metrics = Arc::new(MetricsRegistry::new());
    let admission = Arc::new(AdmissionControl::new(1, 1, Duration::from_secs(2), metrics));

    let g1 = admission.acquire().await.unwrap();

    let waiter_admission = admission.clone();
    let waiter = tokio::spawn(async move { waiter_admission.acquire().await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    drop(g1);

    let g2 = waiter.await.unwrap();
    assert!(g2.is_ok(), "queued waiter should be admitted once a permit frees up");
}
