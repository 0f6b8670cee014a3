//! # Build Statistics
//!
//! Atomic counters updated by producer and sort threads during a build.
//! Counters are monotonic and relaxed — they exist for observability, not
//! coordination.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BuildStats {
    pub records_stored: AtomicU64,
    pub batches_submitted: AtomicU64,
    pub bytes_spilled: AtomicU64,
    pub buckets_sorted: AtomicU64,
}

impl BuildStats {
    pub fn snapshot(&self) -> BuildStatsSnapshot {
        BuildStatsSnapshot {
            records_stored: self.records_stored.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            bytes_spilled: self.bytes_spilled.load(Ordering::Relaxed),
            buckets_sorted: self.buckets_sorted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStatsSnapshot {
    pub records_stored: u64,
    pub batches_submitted: u64,
    pub bytes_spilled: u64,
    pub buckets_sorted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = BuildStats::default();
        stats.records_stored.fetch_add(3, Ordering::Relaxed);
        stats.bytes_spilled.fetch_add(4096, Ordering::Relaxed);

        let snap = stats.snapshot();
        assert_eq!(snap.records_stored, 3);
        assert_eq!(snap.bytes_spilled, 4096);
        assert_eq!(snap.buckets_sorted, 0);
    }
}
