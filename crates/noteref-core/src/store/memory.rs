use std::collections::HashMap;

use nostr_sdk::prelude::*;
use parking_lot::RwLock;

use super::{coordinate_d_tag, decode_for_ingest, LocalStore, StoreError};

type CoordinateKey = (u16, PublicKey, String);

#[derive(Default)]
struct Inner {
    events: HashMap<EventId, Event>,
    latest: HashMap<CoordinateKey, EventId>,
}

/// In-process store, for tests and sessions without a data directory.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStore for MemoryStore {
    fn get_by_id(&self, id: &EventId) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().events.get(id).map(|event| event.as_json()))
    }

    fn get_by_coordinate(
        &self,
        kind: u16,
        pubkey: &PublicKey,
        d_tag: &str,
    ) -> Result<Option<String>, StoreError> {
        let inner = self.inner.read();
        let key = (kind, *pubkey, d_tag.to_string());
        Ok(inner
            .latest
            .get(&key)
            .and_then(|id| inner.events.get(id))
            .map(|event| event.as_json()))
    }

    fn ingest(&self, json: &str) -> Result<bool, StoreError> {
        let event = decode_for_ingest(json)?;
        let mut inner = self.inner.write();
        if inner.events.contains_key(&event.id) {
            return Ok(false);
        }

        if let Some(d_tag) = coordinate_d_tag(&event) {
            let key = (event.kind.as_u16(), event.pubkey, d_tag);
            let newer = match inner.latest.get(&key).and_then(|id| inner.events.get(id)) {
                Some(current) => event.created_at > current.created_at,
                None => true,
            };
            if newer {
                inner.latest.insert(key, event.id);
            }
        }

        inner.events.insert(event.id, event);
        Ok(true)
    }
}
