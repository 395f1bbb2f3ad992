//! Cache usage counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups answered by the memory tier.
    pub memory_hits: u64,
    /// Lookups the memory tier could not answer.
    pub memory_misses: u64,
    /// Lookups answered by the persistent tier.
    pub storage_hits: u64,
    /// Lookups neither tier could answer.
    pub storage_misses: u64,
    /// Number of entries currently in the memory tier.
    pub total_entries: usize,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// Persistent writes that failed and were skipped.
    pub persistence_failures: u64,
}

impl CacheStats {
    /// Fraction of lookups answered by either tier (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.storage_hits;
        let total = hits + self.storage_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Live counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    storage_hits: AtomicU64,
    storage_misses: AtomicU64,
    evictions: AtomicU64,
    persistence_failures: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn storage_hit(&self) {
        self.storage_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn storage_miss(&self) {
        self.storage_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, total_entries: usize) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            memory_misses: self.memory_misses.load(Ordering::Relaxed),
            storage_hits: self.storage_hits.load(Ordering::Relaxed),
            storage_misses: self.storage_misses.load(Ordering::Relaxed),
            total_entries,
            evictions: self.evictions.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}
