use std::sync::{Arc, RwLock};

use serde::Serialize;

/// Counters describing how resolutions were served
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverStats {
    /// Unparseable input answered with the raw-text fallback
    pub fallbacks: u64,
    /// Served from the local store without going online
    pub local_hits: u64,
    pub cache_hits_positive: u64,
    pub cache_hits_negative: u64,
    pub cache_misses: u64,
    /// Consumers attached to an already running fetch
    pub joins: u64,
    pub queries_started: u64,
    pub completions_found: u64,
    pub completions_not_found: u64,
    /// Fetches that ended in transport error, timeout or cancellation
    pub completions_failed: u64,
    pub cancellations: u64,
    /// Whole-cache clears on overflow
    pub cache_clears: u64,
}

impl ResolverStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_cache_hits(&self) -> u64 {
        self.cache_hits_positive + self.cache_hits_negative
    }

    pub fn total_completions(&self) -> u64 {
        self.completions_found + self.completions_not_found + self.completions_failed
    }
}

/// Thread-safe wrapper for resolver stats
#[derive(Debug, Clone, Default)]
pub struct SharedResolverStats {
    inner: Arc<RwLock<ResolverStats>>,
}

impl SharedResolverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to the counters. Poisoned locks drop the update.
    pub fn record(&self, f: impl FnOnce(&mut ResolverStats)) {
        if let Ok(mut stats) = self.inner.write() {
            f(&mut stats);
        }
    }

    pub fn snapshot(&self) -> ResolverStats {
        self.inner.read().map(|s| s.clone()).unwrap_or_default()
    }
}
