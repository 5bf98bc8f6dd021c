//! Bounded, TTL'd cache of network-confirmed resolution results.
//!
//! Positive entries carry metadata; negative entries record a confirmed "not found".
//! Entries older than the TTL read as misses and are dropped when touched.
//!
//! # Overflow
//! When an insert of a new key would exceed `max_entries`, the whole cache is cleared
//! first. There is no LRU ordering; a burst of distinct references empties the cache
//! every `max_entries` inserts.
//!
//! The cache does no locking of its own. It lives inside the registry state so that
//! completion writes and resolver reads share one lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metadata::EmbedMetadata;
use crate::reference::CacheKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheHit {
    Positive(Arc<EmbedMetadata>),
    Negative,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    payload: Option<Arc<EmbedMetadata>>,
    inserted_at: Instant,
}

impl CacheEntry {
    pub fn payload(&self) -> Option<&Arc<EmbedMetadata>> {
        self.payload.as_ref()
    }

    pub fn is_negative(&self) -> bool {
        self.payload.is_none()
    }

    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    fn to_hit(&self) -> CacheHit {
        match &self.payload {
            Some(metadata) => CacheHit::Positive(metadata.clone()),
            None => CacheHit::Negative,
        }
    }
}

#[derive(Debug)]
pub struct ResultCache {
    entries: HashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl ResultCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries,
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<CacheHit> {
        self.get_at(key, Instant::now())
    }

    /// Lookup as of `now`. An entry aged `ttl` or more is purged and reads as a miss.
    pub fn get_at(&mut self, key: &CacheKey, now: Instant) -> Option<CacheHit> {
        let entry = self.entries.get(key)?;
        if now.saturating_duration_since(entry.inserted_at) >= self.ttl {
            self.entries.remove(key);
            return None;
        }
        Some(entry.to_hit())
    }

    /// Returns `true` if the insert cleared the cache.
    pub fn put_positive(&mut self, key: CacheKey, metadata: Arc<EmbedMetadata>) -> bool {
        self.insert(key, Some(metadata))
    }

    /// Returns `true` if the insert cleared the cache.
    pub fn put_negative(&mut self, key: CacheKey) -> bool {
        self.insert(key, None)
    }

    fn insert(&mut self, key: CacheKey, payload: Option<Arc<EmbedMetadata>>) -> bool {
        let cleared = !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries;
        if cleared {
            tracing::debug!(
                entries = self.entries.len(),
                max = self.max_entries,
                "result cache full, clearing"
            );
            self.entries.clear();
        }

        self.entries.insert(
            key,
            CacheEntry {
                payload,
                inserted_at: Instant::now(),
            },
        );
        cleared
    }

    pub fn entry(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(title: &str) -> Arc<EmbedMetadata> {
        Arc::new(EmbedMetadata {
            event_id: "id".to_string(),
            pubkey: "pk".to_string(),
            kind: 1,
            created_at: 1,
            title: title.to_string(),
            author_short_handle: "@a".to_string(),
            formatted_timestamp: "now".to_string(),
            content_snippet: "snippet".to_string(),
        })
    }

    #[test]
    fn test_positive_and_negative_hits() {
        let mut cache = ResultCache::new(Duration::from_secs(60), 10);
        let found = CacheKey::from("id:found");
        let missing = CacheKey::from("id:missing");

        assert_eq!(cache.get(&found), None);
        cache.put_positive(found.clone(), metadata("Found"));
        cache.put_negative(missing.clone());

        assert_eq!(cache.get(&found), Some(CacheHit::Positive(metadata("Found"))));
        assert_eq!(cache.get(&missing), Some(CacheHit::Negative));
        assert!(cache.entry(&missing).unwrap().is_negative());
        assert!(cache.entry(&found).unwrap().payload().is_some());
    }

    #[test]
    fn test_entry_expires_at_ttl() {
        let ttl = Duration::from_secs(60);
        let mut cache = ResultCache::new(ttl, 10);
        let key = CacheKey::from("id:k");
        cache.put_positive(key.clone(), metadata("K"));
        let written = cache.entry(&key).unwrap().inserted_at();

        assert!(cache.get_at(&key, written + ttl - Duration::from_millis(1)).is_some());
        assert_eq!(cache.get_at(&key, written + ttl), None);
        // Expired entries are purged on access
        assert!(cache.is_empty());
    }

    #[test]
    fn test_negative_entries_expire_too() {
        let ttl = Duration::from_secs(5);
        let mut cache = ResultCache::new(ttl, 10);
        let key = CacheKey::from("p:gone");
        cache.put_negative(key.clone());

        assert_eq!(cache.get_at(&key, Instant::now() + ttl), None);
    }

    #[test]
    fn test_overflow_clears_everything() {
        let mut cache = ResultCache::new(Duration::from_secs(60), 2);
        let a = CacheKey::from("id:a");
        let b = CacheKey::from("id:b");
        let c = CacheKey::from("id:c");

        assert!(!cache.put_positive(a.clone(), metadata("A")));
        assert!(!cache.put_negative(b.clone()));
        // Rewriting an existing key never triggers a clear
        assert!(!cache.put_positive(b.clone(), metadata("B")));
        assert_eq!(cache.len(), 2);

        assert!(cache.put_positive(c.clone(), metadata("C")));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&a), None);
        assert_eq!(cache.get(&b), None);
        assert!(cache.get(&c).is_some());
    }
}
