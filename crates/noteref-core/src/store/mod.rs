//! Local event storage consulted before any relay is asked.
//!
//! Lookups are synchronous and cheap. "Not found" is `Ok(None)`; an `Err` means the
//! store itself failed, which callers treat as a miss.

pub mod db;
pub mod memory;

use nostr_sdk::prelude::*;

use crate::constants::kinds;
use crate::reference::Reference;
use crate::tags::extract_tag_str;

pub use db::SqliteStore;
pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

pub trait LocalStore: Send + Sync {
    /// Raw JSON of the event with this id.
    fn get_by_id(&self, id: &EventId) -> Result<Option<String>, StoreError>;

    /// Newest replaceable/addressable event at `kind:pubkey:d_tag`.
    fn get_by_coordinate(
        &self,
        kind: u16,
        pubkey: &PublicKey,
        d_tag: &str,
    ) -> Result<Option<String>, StoreError>;

    /// Newest kind:0 profile of `pubkey`.
    fn get_profile(&self, pubkey: &PublicKey) -> Result<Option<String>, StoreError> {
        self.get_by_coordinate(kinds::METADATA, pubkey, "")
    }

    /// Verify and store an event. Returns `true` if it was not stored before.
    fn ingest(&self, json: &str) -> Result<bool, StoreError>;
}

/// Look up whatever `reference` points at.
pub fn lookup_reference(
    store: &dyn LocalStore,
    reference: &Reference,
) -> Result<Option<String>, StoreError> {
    match reference {
        Reference::NoteId { id } | Reference::EventPointer { id, .. } => store.get_by_id(id),
        Reference::AddressablePointer {
            kind,
            pubkey,
            d_tag,
            ..
        } => store.get_by_coordinate(*kind, pubkey, d_tag),
        Reference::ProfilePointer { pubkey, .. } => store.get_profile(pubkey),
        Reference::Unparseable { .. } => Ok(None),
    }
}

/// Coordinate `d` value for replaceable (empty) and addressable kinds, `None` otherwise.
pub(crate) fn coordinate_d_tag(event: &Event) -> Option<String> {
    let kind = event.kind.as_u16();
    match kind {
        0 | 3 | 10_000..=19_999 => Some(String::new()),
        30_000..=39_999 => Some(extract_tag_str(event, "d").unwrap_or("").to_string()),
        _ => None,
    }
}

pub(crate) fn decode_for_ingest(json: &str) -> Result<Event, StoreError> {
    crate::metadata::decode_event(json).map_err(|e| StoreError::InvalidEvent(e.to_string()))
}
