//! Per-store operation counters.
//!
//! Plain relaxed atomics bumped on the hot paths; `snapshot` gives a
//! consistent-enough copy for telemetry. There is no global state: every
//! store owns its own `Stats`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct Stats {
    add: AtomicU64,
    contains: AtomicU64,
    get: AtomicU64,
    get_invalid_key: AtomicU64,
    get_slice: AtomicU64,
    get_stream: AtomicU64,
    remove: AtomicU64,
    remove_invalid_key: AtomicU64,
    list: AtomicU64,
    flush: AtomicU64,
    latest_key_added: Mutex<Option<String>>,
    latest_key_flushed: Mutex<Option<String>>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub count_add: u64,
    pub count_contains: u64,
    pub count_get: u64,
    pub count_get_invalid_key: u64,
    pub count_get_slice: u64,
    pub count_get_stream: u64,
    pub count_remove: u64,
    pub count_remove_invalid_key: u64,
    pub count_list: u64,
    pub count_flush: u64,
    pub latest_key_added: Option<String>,
    pub latest_key_flushed: Option<String>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_add(&self, key: &str) {
        self.add.fetch_add(1, Ordering::Relaxed);
        *self.latest_key_added.lock().unwrap() = Some(key.to_string());
    }

    pub fn record_contains(&self) {
        self.contains.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get(&self, hit: bool) {
        self.get.fetch_add(1, Ordering::Relaxed);
        if !hit {
            self.get_invalid_key.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_get_slice(&self) {
        self.get_slice.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get_stream(&self) {
        self.get_stream.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remove(&self, hit: bool) {
        if hit {
            self.remove.fetch_add(1, Ordering::Relaxed);
        } else {
            self.remove_invalid_key.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_list(&self) {
        self.list.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks everything added so far as flushed.
    pub fn record_flush(&self) {
        self.flush.fetch_add(1, Ordering::Relaxed);
        let latest = self.latest_key_added.lock().unwrap().clone();
        *self.latest_key_flushed.lock().unwrap() = latest;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            count_add: self.add.load(Ordering::Relaxed),
            count_contains: self.contains.load(Ordering::Relaxed),
            count_get: self.get.load(Ordering::Relaxed),
            count_get_invalid_key: self.get_invalid_key.load(Ordering::Relaxed),
            count_get_slice: self.get_slice.load(Ordering::Relaxed),
            count_get_stream: self.get_stream.load(Ordering::Relaxed),
            count_remove: self.remove.load(Ordering::Relaxed),
            count_remove_invalid_key: self.remove_invalid_key.load(Ordering::Relaxed),
            count_list: self.list.load(Ordering::Relaxed),
            count_flush: self.flush.load(Ordering::Relaxed),
            latest_key_added: self.latest_key_added.lock().unwrap().clone(),
            latest_key_flushed: self.latest_key_flushed.lock().unwrap().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let s = Stats::new().snapshot();
        assert_eq!(s, StatsSnapshot::default());
    }

    #[test]
    fn test_get_miss_bumps_invalid_key() {
        let stats = Stats::new();
        stats.record_get(true);
        stats.record_get(false);
        let s = stats.snapshot();
        assert_eq!(s.count_get, 2);
        assert_eq!(s.count_get_invalid_key, 1);
    }

    #[test]
    fn test_remove_miss_is_counted_separately() {
        let stats = Stats::new();
        stats.record_remove(true);
        stats.record_remove(false);
        let s = stats.snapshot();
        assert_eq!(s.count_remove, 1);
        assert_eq!(s.count_remove_invalid_key, 1);
    }

    #[test]
    fn test_flush_promotes_latest_key() {
        let stats = Stats::new();
        stats.record_add("a");
        stats.record_add("b");
        assert_eq!(stats.snapshot().latest_key_flushed, None);
        stats.record_flush();
        let s = stats.snapshot();
        assert_eq!(s.latest_key_added.as_deref(), Some("b"));
        assert_eq!(s.latest_key_flushed.as_deref(), Some("b"));
    }
}
