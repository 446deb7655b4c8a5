//! Cache counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of cache usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Resolves answered from a resident, unexpired entry.
    pub hits: u64,
    /// Resolves that had to wait on a directory load.
    pub misses: u64,
    /// Directory lookups started.
    pub loads: u64,
    /// Directory lookups that failed or timed out.
    pub load_failures: u64,
    /// Entries evicted due to capacity.
    pub evictions: u64,
    /// Entries removed by invalidation.
    pub invalidations: u64,
    /// Load results discarded because an invalidation or a newer revision
    /// superseded them.
    pub stale_discards: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Maximum number of resident entries.
    pub capacity: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    stale_discards: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale_discard(&self) {
        self.stale_discards.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entry_count: usize, capacity: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            entry_count: entry_count as u64,
            capacity: capacity as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = StatsRecorder::default();
        recorder.hit();
        recorder.hit();
        recorder.miss();
        recorder.load();
        recorder.eviction();
        let stats = recorder.snapshot(4, 10);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 4);
        assert_eq!(stats.capacity, 10);
    }
}
