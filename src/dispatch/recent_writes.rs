//! In-memory `{collection_identifier -> monotonic timestamp}` map driving
//! the consistency-window read pin. Mutated under a single mutex; pruned
//! lazily on access rather than by a dedicated background task.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RecentWrites {
    window: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl RecentWrites {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, collection_identifier: &str) {
        let mut entries = self.entries.lock().expect("recent_writes mutex poisoned");
        entries.insert(collection_identifier.to_string(), Instant::now());
    }

    /// True iff `collection_identifier` was written within the
    /// consistency window. Opportunistically prunes expired entries.
    pub fn is_recent(&self, collection_identifier: &str) -> bool {
        let mut entries = self.entries.lock().expect("recent_writes mutex poisoned");
        let now = Instant::now();
        entries.retain(|_, t| now.duration_since(*t) < self.window);
        entries
            .get(collection_identifier)
            .map(|t| now.duration_since(*t) < self.window)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_reports_recent_write() {
        let rw = RecentWrites::new(Duration::from_secs(30));
        assert!(!rw.is_recent("COL1"));
        rw.record("COL1");
        assert!(rw.is_recent("COL1"));
        assert!(!rw.is_recent("COL2"));
    }

    #[test]
    fn expires_after_window() {
        let rw = RecentWrites::new(Duration::from_millis(20));
        rw.record("COL1");
        assert!(rw.is_recent("COL1"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!rw.is_recent("COL1"));
    }
}
