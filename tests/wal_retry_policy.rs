//! WAL retry-backoff policy: exponential growth, a 15-minute cap, and a
//! larger base when the primary is down — the "timing gap" mitigation
//! described in §4.D's retry policy.

use vdb_proxy::wal::WalEngine;

#[test]
fn backoff_grows_exponentially_with_retry_count() {
    let zero = WalEngine::backoff(0, true);
    let one = WalEngine::backoff(1, true);
    let two = WalEngine::backoff(2, true);
    assert_eq!(zero.as_secs(), 15);
    assert_eq!(one.as_secs(), 30);
    assert_eq!(two.as_secs(), 60);
}

#[test]
fn backoff_is_capped_at_fifteen_minutes() {
    let far_out = WalEngine::backoff(12, true);
    assert_eq!(far_out.as_secs(), 15 * 60);
}

#[test]
fn unhealthy_primary_uses_a_larger_backoff_base() {
    let healthy_base = WalEngine::backoff(0, true);
    let unhealthy_base = WalEngine::backoff(0, false);
    assert_eq!(healthy_base.as_secs(), 15);
    assert_eq!(unhealthy_base.as_secs(), 60);
    assert!(unhealthy_base > healthy_base);
}
