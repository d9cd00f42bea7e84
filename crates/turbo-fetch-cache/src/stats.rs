//! Cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Fetch functions invoked.
    pub fetches_started: u64,
    /// Fetches that settled with a value.
    pub fetches_succeeded: u64,
    /// Fetches that settled with a failure.
    pub fetches_failed: u64,
    /// Resolves answered from the cache without fetching.
    pub cache_hits: u64,
    /// Resolves that joined an in-flight fetch as a waiter.
    pub deduplicated: u64,
    /// External mutations applied.
    pub mutations: u64,
    /// Refetch broadcasts issued.
    pub refetch_broadcasts: u64,
}

impl CacheStats {
    /// Fraction of resolves that did not start a fetch.
    pub fn dedup_ratio(&self) -> f64 {
        let saved = self.cache_hits + self.deduplicated;
        let total = saved + self.fetches_started;
        if total == 0 {
            0.0
        } else {
            saved as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    fetches_started: AtomicU64,
    fetches_succeeded: AtomicU64,
    fetches_failed: AtomicU64,
    cache_hits: AtomicU64,
    deduplicated: AtomicU64,
    mutations: AtomicU64,
    refetch_broadcasts: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn fetch_started(&self) {
        self.fetches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fetch_succeeded(&self) {
        self.fetches_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fetch_failed(&self) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mutation(&self) {
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn refetch_broadcast(&self) {
        self.refetch_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_succeeded: self.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            mutations: self.mutations.load(Ordering::Relaxed),
            refetch_broadcasts: self.refetch_broadcasts.load(Ordering::Relaxed),
        }
    }
}
