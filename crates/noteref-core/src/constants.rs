//! Application-wide constants
//!
//! Centralized location for magic strings and tuning values
//! that are used across multiple modules.

/// Relays queried when a reference carries no hints and no config overrides them
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
];

/// URI scheme prefix stripped before parsing (NIP-21)
pub const NOSTR_URI_PREFIX: &str = "nostr:";

/// Lifetime of a network-confirmed cache entry, positive or negative
pub const CACHE_TTL_SECS: u64 = 60;

/// Entry count at which the result cache is cleared wholesale
pub const CACHE_MAX_ENTRIES: usize = 1000;

/// Per-query relay timeout
pub const QUERY_TIMEOUT_SECS: u64 = 10;

/// Maximum characters of note content kept in an embed snippet
pub const SNIPPET_MAX_CHARS: usize = 150;

/// Number of hex characters shown when an author has no known profile
pub const SHORT_HEX_LEN: usize = 8;

// Nostr event kinds the resolver treats specially
pub mod kinds {
    /// Metadata (profiles)
    pub const METADATA: u16 = 0;
}
