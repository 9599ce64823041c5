//! Cache activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by the cache manager while handling events.
#[derive(Debug, Default)]
pub struct FetchStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stored: AtomicU64,
    bypassed: AtomicU64,
    network_errors: AtomicU64,
    precached: AtomicU64,
    precache_failures: AtomicU64,
}

/// Point-in-time copy of [`FetchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Intercepted requests answered from cache.
    pub hits: u64,
    /// Intercepted requests that went to the network.
    pub misses: u64,
    /// Runtime responses written to the cache.
    pub stored: u64,
    /// Requests left to the default network handling.
    pub bypassed: u64,
    /// Intercepted requests whose network fetch failed.
    pub network_errors: u64,
    /// Manifest entries cached during install.
    pub precached: u64,
    /// Manifest entries that failed to cache during install.
    pub precache_failures: u64,
}

impl StatsSnapshot {
    /// Fraction of intercepted requests served from cache, or `None` before
    /// any intercepted request.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        (total > 0).then(|| self.hits as f64 / total as f64)
    }
}

impl FetchStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_precache(&self, cached: u64, failed: u64) {
        self.precached.fetch_add(cached, Ordering::Relaxed);
        self.precache_failures.fetch_add(failed, Ordering::Relaxed);
    }

    /// Reads all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            precached: self.precached.load(Ordering::Relaxed),
            precache_failures: self.precache_failures.load(Ordering::Relaxed),
        }
    }
}
