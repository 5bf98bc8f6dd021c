//! Display metadata derived from a resolved event.

use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::{kinds, SHORT_HEX_LEN, SNIPPET_MAX_CHARS};
use crate::store::LocalStore;
use crate::tags::extract_first_of;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Invalid event JSON: {0}")]
    Json(String),

    #[error("Event failed verification: {0}")]
    Verification(String),
}

/// Display-ready summary of a referenced event. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedMetadata {
    pub event_id: String,
    pub pubkey: String,
    pub kind: u16,
    pub created_at: u64,
    pub title: String,
    pub author_short_handle: String,
    pub formatted_timestamp: String,
    pub content_snippet: String,
}

/// The subset of kind:0 profile content used for embeds.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl AuthorProfile {
    pub fn from_content(content: &str) -> Option<Self> {
        serde_json::from_str(content).ok()
    }

    /// Parse a stored kind:0 event. Anything else yields `None`.
    pub fn from_event_json(json: &str) -> Option<Self> {
        let event = Event::from_json(json).ok()?;
        if event.kind.as_u16() != kinds::METADATA {
            return None;
        }
        Self::from_content(&event.content)
    }

    /// `display_name`, then `name`
    pub fn display_name(&self) -> Option<&str> {
        non_empty(&self.display_name).or_else(|| non_empty(&self.name))
    }

    pub fn handle(&self) -> Option<String> {
        non_empty(&self.name).map(|name| {
            if name.starts_with('@') {
                name.to_string()
            } else {
                format!("@{name}")
            }
        })
    }
}

/// Decode relay or store JSON into a verified event.
pub fn decode_event(json: &str) -> Result<Event, MetadataError> {
    let event = Event::from_json(json).map_err(|e| MetadataError::Json(e.to_string()))?;
    event
        .verify()
        .map_err(|e| MetadataError::Verification(e.to_string()))?;
    Ok(event)
}

pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Compact relative age: "now", "5m", "3h", "2d". Empty for a zero timestamp.
pub fn format_relative_time(created_at: u64, now: u64) -> String {
    if created_at == 0 {
        return String::new();
    }

    let diff = now.saturating_sub(created_at);
    match diff {
        d if d < 60 => "now".to_string(),
        d if d < 3_600 => format!("{}m", d / 60),
        d if d < 86_400 => format!("{}h", d / 3_600),
        d => format!("{}d", d / 86_400),
    }
}

/// Collapse whitespace runs and cap the length, appending "..." when cut.
pub fn truncate_snippet(content: &str, max_chars: usize) -> String {
    let mut out = String::new();
    let mut count = 0;
    let mut prev_space = false;

    for c in content.trim().chars() {
        if count == max_chars {
            out.push_str("...");
            break;
        }
        if c.is_whitespace() {
            if prev_space {
                continue;
            }
            prev_space = true;
            out.push(' ');
        } else {
            prev_space = false;
            out.push(c);
        }
        count += 1;
    }

    out
}

pub fn short_hex(hex: &str) -> String {
    let end = hex.len().min(SHORT_HEX_LEN);
    format!("{}...", &hex[..end])
}

impl EmbedMetadata {
    /// Build metadata for `event`. `author` is the kind:0 profile of the event's
    /// author when one is known; kind:0 events describe themselves.
    pub fn from_event(event: &Event, author: Option<&AuthorProfile>, now: u64) -> Self {
        let pubkey = event.pubkey.to_hex();
        let short = short_hex(&pubkey);
        let kind = event.kind.as_u16();
        let created_at = event.created_at.as_secs();

        let own_profile;
        let (author, snippet_source) = if kind == kinds::METADATA {
            own_profile = AuthorProfile::from_content(&event.content).unwrap_or_default();
            let about = own_profile.about.clone().unwrap_or_default();
            (Some(&own_profile), about)
        } else {
            (author, event.content.clone())
        };

        let author_display = author
            .and_then(AuthorProfile::display_name)
            .map(str::to_string)
            .unwrap_or_else(|| short.clone());
        let title = if kind == kinds::METADATA {
            author_display
        } else {
            extract_first_of(event, &["title", "name", "subject"])
                .map(|t| t.trim().to_string())
                .unwrap_or(author_display)
        };

        Self {
            event_id: event.id.to_hex(),
            pubkey,
            kind,
            created_at,
            title,
            author_short_handle: author.and_then(AuthorProfile::handle).unwrap_or(short),
            formatted_timestamp: format_relative_time(created_at, now),
            content_snippet: truncate_snippet(&snippet_source, SNIPPET_MAX_CHARS),
        }
    }
}

/// Describe `event`, enriching the author from the local store's profile when present.
/// Store failures only cost the enrichment.
pub fn describe_event(event: &Event, store: Option<&dyn LocalStore>, now: u64) -> EmbedMetadata {
    let author = match store {
        Some(store) if event.kind.as_u16() != kinds::METADATA => {
            match store.get_profile(&event.pubkey) {
                Ok(Some(json)) => AuthorProfile::from_event_json(&json),
                Ok(None) => None,
                Err(e) => {
                    tracing::debug!(error = %e, "author profile lookup failed");
                    None
                }
            }
        }
        _ => None,
    };
    EmbedMetadata::from_event(event, author.as_ref(), now)
}
