//! Consistency-window read pinning (§4.E, scenario 6): a write recorded
//! against a collection pins reads for that collection until the window
//! elapses, then releases back to normal read-ratio selection.

use std::time::Duration;

use vdb_proxy::dispatch::RecentWrites;

#[test]
fn write_pins_its_collection_within_the_window() {
    let recent = RecentWrites::new(Duration::from_secs(30));
    assert!(!recent.is_recent("COL5"));

    recent.record("COL5");
    assert!(recent.is_recent("COL5"), "a just-written collection must be pinned");
    assert!(!recent.is_recent("COL6"), "an unrelated collection must not be pinned");
}

#[tokio::test]
async fn pin_expires_after_the_configured_window() {
    let recent = RecentWrites::new(Duration::from_millis(30));
    recent.record("COL5");
    assert!(recent.is_recent("COL5"));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!recent.is_recent("COL5"), "pin must release once the consistency window elapses");
}
