//! Typed references to remote content and their canonical cache keys.
//!
//! A raw reference string (`note1…`, `nevent1…`, `naddr1…`, `npub1…`, `nprofile1…`,
//! a bare hex event id, or a canonical key such as `id:<hex>`) is parsed into a
//! [`Reference`]. Every variant maps to exactly one [`CacheKey`], so two references
//! that point at the same entity share cache entries and inflight fetches.

use std::fmt;

use nostr_sdk::prelude::*;

use crate::constants::{kinds, NOSTR_URI_PREFIX};
use crate::tags::extract_tag_str;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Empty reference")]
    Empty,

    #[error("Invalid bech32 reference: {0}")]
    Bech32(String),

    #[error("Unsupported reference type: {0}")]
    Unsupported(&'static str),

    #[error("Invalid reference: {0}")]
    Invalid(String),
}

/// Parsed pointer to a piece of remote content. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    NoteId {
        id: EventId,
    },
    EventPointer {
        id: EventId,
        relay_hints: Vec<String>,
    },
    AddressablePointer {
        kind: u16,
        pubkey: PublicKey,
        d_tag: String,
        relay_hints: Vec<String>,
    },
    ProfilePointer {
        pubkey: PublicKey,
        relay_hints: Vec<String>,
    },
    Unparseable {
        raw: String,
    },
}

/// Canonical identity of a [`Reference`], used for caching and coalescing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Reference {
    /// Canonical key, or `None` for unparseable input (which is never cached).
    pub fn cache_key(&self) -> Option<CacheKey> {
        let key = match self {
            Reference::NoteId { id } | Reference::EventPointer { id, .. } => {
                format!("id:{}", id.to_hex())
            }
            Reference::AddressablePointer {
                kind,
                pubkey,
                d_tag,
                ..
            } => format!("a:{}:{}:{}", kind, pubkey.to_hex(), d_tag),
            Reference::ProfilePointer { pubkey, .. } => format!("p:{}", pubkey.to_hex()),
            Reference::Unparseable { .. } => return None,
        };
        Some(CacheKey(key))
    }

    pub fn relay_hints(&self) -> &[String] {
        match self {
            Reference::EventPointer { relay_hints, .. }
            | Reference::AddressablePointer { relay_hints, .. }
            | Reference::ProfilePointer { relay_hints, .. } => relay_hints,
            Reference::NoteId { .. } | Reference::Unparseable { .. } => &[],
        }
    }

    pub fn is_unparseable(&self) -> bool {
        matches!(self, Reference::Unparseable { .. })
    }

    /// Relay filter that selects the referenced event.
    pub fn filter(&self) -> Option<Filter> {
        let filter = match self {
            Reference::NoteId { id } | Reference::EventPointer { id, .. } => {
                Filter::new().id(*id)
            }
            Reference::AddressablePointer {
                kind,
                pubkey,
                d_tag,
                ..
            } => Filter::new()
                .kind(Kind::from(*kind))
                .author(*pubkey)
                .identifier(d_tag.clone()),
            Reference::ProfilePointer { pubkey, .. } => {
                Filter::new().kind(Kind::Metadata).author(*pubkey)
            }
            Reference::Unparseable { .. } => return None,
        };
        Some(filter.limit(1))
    }

    /// Whether `event` is the entity this reference points at.
    ///
    /// Relays may answer with unrelated events; those are treated as undecodable.
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Reference::NoteId { id } | Reference::EventPointer { id, .. } => event.id == *id,
            Reference::AddressablePointer {
                kind,
                pubkey,
                d_tag,
                ..
            } => {
                event.kind.as_u16() == *kind
                    && event.pubkey == *pubkey
                    && extract_tag_str(event, "d").unwrap_or("") == d_tag
            }
            Reference::ProfilePointer { pubkey, .. } => {
                event.kind.as_u16() == kinds::METADATA && event.pubkey == *pubkey
            }
            Reference::Unparseable { .. } => false,
        }
    }
}

/// Strip a leading `nostr:` scheme (case-insensitive) and surrounding whitespace.
pub fn strip_uri_prefix(raw: &str) -> &str {
    let trimmed = raw.trim();
    match trimmed.get(..NOSTR_URI_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(NOSTR_URI_PREFIX) => {
            trimmed[NOSTR_URI_PREFIX.len()..].trim_start()
        }
        _ => trimmed,
    }
}

/// Decoder from raw reference text to a typed [`Reference`].
pub trait ReferenceParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<Reference, ParseError>;
}

/// Parse, folding any failure into [`Reference::Unparseable`].
pub fn parse_or_unparseable(parser: &dyn ReferenceParser, raw: &str) -> Reference {
    match parser.parse(raw) {
        Ok(reference) => reference,
        Err(e) => {
            tracing::debug!(raw, error = %e, "reference did not parse");
            Reference::Unparseable {
                raw: raw.to_string(),
            }
        }
    }
}

/// NIP-19 parser, also accepting bare hex ids and canonical key strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct Nip19Parser;

impl ReferenceParser for Nip19Parser {
    fn parse(&self, raw: &str) -> Result<Reference, ParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ParseError::Empty);
        }

        if let Some(hex) = raw.strip_prefix("id:") {
            return parse_event_id(hex).map(|id| Reference::NoteId { id });
        }
        if let Some(hex) = raw.strip_prefix("p:") {
            return parse_pubkey(hex).map(|pubkey| Reference::ProfilePointer {
                pubkey,
                relay_hints: Vec::new(),
            });
        }
        if let Some(coordinate) = raw.strip_prefix("a:") {
            return parse_coordinate(coordinate);
        }
        if raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return parse_event_id(raw).map(|id| Reference::NoteId { id });
        }

        parse_bech32(raw)
    }
}

fn parse_event_id(hex: &str) -> Result<EventId, ParseError> {
    EventId::from_hex(hex).map_err(|e| ParseError::Invalid(format!("event id: {e}")))
}

fn parse_pubkey(hex: &str) -> Result<PublicKey, ParseError> {
    PublicKey::from_hex(hex).map_err(|e| ParseError::Invalid(format!("pubkey: {e}")))
}

/// `<kind>:<pubkey>:<d tag>`; the d tag may itself contain `:`.
fn parse_coordinate(coordinate: &str) -> Result<Reference, ParseError> {
    let mut parts = coordinate.splitn(3, ':');
    let (Some(kind), Some(pubkey), Some(d_tag)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::Invalid(format!(
            "coordinate needs kind:pubkey:d, got {coordinate}"
        )));
    };
    let kind = kind
        .parse::<u16>()
        .map_err(|e| ParseError::Invalid(format!("kind {kind}: {e}")))?;

    Ok(Reference::AddressablePointer {
        kind,
        pubkey: parse_pubkey(pubkey)?,
        d_tag: d_tag.to_string(),
        relay_hints: Vec::new(),
    })
}

fn relay_strings(relays: &[RelayUrl]) -> Vec<String> {
    relays.iter().map(|url| url.to_string()).collect()
}

fn parse_bech32(raw: &str) -> Result<Reference, ParseError> {
    let decoded = Nip19::from_bech32(raw).map_err(|e| ParseError::Bech32(e.to_string()))?;

    match decoded {
        Nip19::EventId(id) => Ok(Reference::NoteId { id }),
        Nip19::Event(event) => Ok(Reference::EventPointer {
            id: event.event_id,
            relay_hints: relay_strings(&event.relays),
        }),
        Nip19::Coordinate(naddr) => Ok(Reference::AddressablePointer {
            kind: naddr.coordinate.kind.as_u16(),
            pubkey: naddr.coordinate.public_key,
            d_tag: naddr.coordinate.identifier.clone(),
            relay_hints: relay_strings(&naddr.relays),
        }),
        Nip19::Pubkey(pubkey) => Ok(Reference::ProfilePointer {
            pubkey,
            relay_hints: Vec::new(),
        }),
        Nip19::Profile(profile) => Ok(Reference::ProfilePointer {
            pubkey: profile.public_key,
            relay_hints: relay_strings(&profile.relays),
        }),
        _ => Err(ParseError::Unsupported("secret key")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NPUB: &str = "npub10elfcs4fr0l0r8af98jlmgdh9c8tcxjvz9qkw038js35mp4dma8qzvjptg";
    const NPUB_HEX: &str = "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e";
    const NPROFILE: &str = "nprofile1qqsrhuxx8l9ex335q7he0f09aej04zpazpl0ne2cgukyawd24mayt8gpp4mhxue69uhhytnc9e3k7mgpz4mhxue69uhkg6nzv9ejuumpv34kytnrdaksjlyr9p";
    const NPROFILE_HEX: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";
    const NSEC: &str = "nsec1vl029mgpspedva04g90vltkh6fvh240zqtv9k0t9af8935ke9laqsnlfe5";
    const ID_HEX: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn test_strip_uri_prefix() {
        assert_eq!(strip_uri_prefix("nostr:npub1abc"), "npub1abc");
        assert_eq!(strip_uri_prefix("  NOSTR:npub1abc "), "npub1abc");
        assert_eq!(strip_uri_prefix("npub1abc"), "npub1abc");
        assert_eq!(strip_uri_prefix("nost"), "nost");
    }

    #[test]
    fn test_parse_note_bech32() {
        let id = EventId::from_hex(ID_HEX).unwrap();
        let note = id.to_bech32().unwrap();

        let reference = Nip19Parser.parse(&note).unwrap();
        assert_eq!(reference, Reference::NoteId { id });
        assert_eq!(
            reference.cache_key().unwrap().as_str(),
            format!("id:{ID_HEX}")
        );
    }

    #[test]
    fn test_parse_npub_and_nprofile() {
        let reference = Nip19Parser.parse(NPUB).unwrap();
        assert_eq!(
            reference.cache_key().unwrap().as_str(),
            format!("p:{NPUB_HEX}")
        );
        assert!(reference.relay_hints().is_empty());

        let reference = Nip19Parser.parse(NPROFILE).unwrap();
        assert_eq!(
            reference.cache_key().unwrap().as_str(),
            format!("p:{NPROFILE_HEX}")
        );
        let hints = reference.relay_hints();
        assert_eq!(hints.len(), 2);
        assert!(hints[0].contains("r.x.com"));
        assert!(hints[1].contains("djbas.sadkb.com"));
    }

    #[test]
    fn test_rejects_secret_keys() {
        assert_eq!(
            Nip19Parser.parse(NSEC),
            Err(ParseError::Unsupported("secret key"))
        );
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(Nip19Parser.parse("   "), Err(ParseError::Empty));
        assert!(matches!(
            Nip19Parser.parse("hello world"),
            Err(ParseError::Bech32(_))
        ));
        assert!(matches!(
            Nip19Parser.parse("id:nothex"),
            Err(ParseError::Invalid(_))
        ));
        assert!(matches!(
            Nip19Parser.parse("a:30023:abc"),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_canonical_keys_round_trip() {
        for raw in [
            format!("id:{ID_HEX}"),
            format!("p:{NPUB_HEX}"),
            format!("a:30023:{NPUB_HEX}:my:article"),
            format!("a:30023:{NPUB_HEX}:"),
        ] {
            let reference = Nip19Parser.parse(&raw).unwrap();
            assert_eq!(reference.cache_key().unwrap().as_str(), raw);
        }
    }

    #[test]
    fn test_same_entity_same_key() {
        let id = EventId::from_hex(ID_HEX).unwrap();
        let bare = Nip19Parser.parse(ID_HEX).unwrap();
        let pointer = Reference::EventPointer {
            id,
            relay_hints: vec!["wss://relay.example.com".to_string()],
        };
        let bech = Nip19Parser.parse(&id.to_bech32().unwrap()).unwrap();

        assert_eq!(bare.cache_key(), pointer.cache_key());
        assert_eq!(bare.cache_key(), bech.cache_key());
    }

    #[test]
    fn test_unparseable_has_no_key_or_filter() {
        let reference = parse_or_unparseable(&Nip19Parser, "garbage");
        assert!(reference.is_unparseable());
        assert!(reference.cache_key().is_none());
        assert!(reference.filter().is_none());
    }

    #[test]
    fn test_matches_checks_identity() {
        let keys = Keys::generate();
        let note = EventBuilder::new(Kind::from(1), "hello")
            .sign_with_keys(&keys)
            .unwrap();
        let article = EventBuilder::new(Kind::from(30023), "body")
            .tag(Tag::identifier("slug"))
            .sign_with_keys(&keys)
            .unwrap();

        assert!(Reference::NoteId { id: note.id }.matches(&note));
        assert!(!Reference::NoteId { id: note.id }.matches(&article));

        let coordinate = Reference::AddressablePointer {
            kind: 30023,
            pubkey: keys.public_key(),
            d_tag: "slug".to_string(),
            relay_hints: Vec::new(),
        };
        assert!(coordinate.matches(&article));
        assert!(!coordinate.matches(&note));

        let profile = Reference::ProfilePointer {
            pubkey: keys.public_key(),
            relay_hints: Vec::new(),
        };
        assert!(!profile.matches(&note));
    }
}
