//! Relay URL list construction.
//!
//! Per-reference hints are tried before the globally configured relays. The global
//! list comes from a [`RelaySource`] and is read once per resolution, so a relay
//! configuration change applies to the next reference resolved.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

/// Merge hints and configured relays: hints first, duplicates and blanks dropped,
/// first occurrence wins. Trailing slashes are ignored when comparing.
pub fn build_relay_urls(hints: &[String], configured: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::with_capacity(hints.len() + configured.len());

    for url in hints.iter().chain(configured.iter()) {
        let url = url.trim();
        if url.is_empty() {
            continue;
        }
        if seen.insert(normalize_relay_url(url)) {
            urls.push(url.to_string());
        }
    }

    urls
}

/// Comparison form of a relay URL: trimmed, lowercase, no trailing slash.
pub fn normalize_relay_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Source of the globally configured relay list.
pub trait RelaySource: Send + Sync {
    fn relay_urls(&self) -> Vec<String>;
}

/// Fixed relay list, typically taken from `ResolverConfig::relays`.
#[derive(Debug, Clone, Default)]
pub struct StaticRelays(pub Vec<String>);

impl RelaySource for StaticRelays {
    fn relay_urls(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// Relay list that can be swapped while the resolver is running.
#[derive(Debug, Clone, Default)]
pub struct SharedRelayList {
    inner: Arc<RwLock<Vec<String>>>,
}

impl SharedRelayList {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(urls)),
        }
    }

    /// Replace the list; resolutions already in flight keep the URLs they started with.
    pub fn replace(&self, urls: Vec<String>) {
        tracing::info!(count = urls.len(), "relay list replaced");
        *self.inner.write() = urls;
    }
}

impl RelaySource for SharedRelayList {
    fn relay_urls(&self) -> Vec<String> {
        self.inner.read().clone()
    }
}
