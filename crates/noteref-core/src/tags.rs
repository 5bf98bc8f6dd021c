//! Tag extraction helpers for signed events
//!
//! Small lookups used when matching relay answers against a reference and when
//! deriving display metadata.

use nostr_sdk::prelude::*;

/// Extract a single string value from a tag by name.
/// Returns the first occurrence if multiple tags exist.
pub fn extract_tag_str<'a>(event: &'a Event, tag_name: &str) -> Option<&'a str> {
    event.tags.iter().find_map(|tag| match tag.as_slice() {
        [name, value, ..] if name == tag_name => Some(value.as_str()),
        _ => None,
    })
}

/// Extract the first non-empty value among several tag names, in priority order.
pub fn extract_first_of<'a>(event: &'a Event, tag_names: &[&str]) -> Option<&'a str> {
    tag_names
        .iter()
        .filter_map(|name| extract_tag_str(event, name))
        .find(|value| !value.trim().is_empty())
}
