use anyhow::{Context, Result};
use noteref_core::{CacheKey, EmbedMetadata, Outcome};
use serde::Serialize;

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Returned by `resolve` itself: fallback, local store, cache, or no relays
    Immediate,
    /// Delivered later by a relay fetch
    Relay,
}

/// One line of `noteref resolve` output
#[derive(Debug, Clone, Serialize)]
pub struct ResolveReport {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub status: &'static str,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EmbedMetadata>,
}

impl ResolveReport {
    pub fn new(input: &str, key: Option<&CacheKey>, outcome: &Outcome, source: Source) -> Self {
        Self {
            input: input.to_string(),
            key: key.map(|k| k.as_str().to_string()),
            status: outcome.status(),
            source,
            metadata: outcome.metadata().cloned(),
        }
    }
}

pub fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    if pretty {
        serde_json::to_string_pretty(value).context("Failed to serialize output")
    } else {
        serde_json::to_string(value).context("Failed to serialize output")
    }
}

/// One JSON document per report, newline separated.
pub fn render_reports(reports: &[ResolveReport], pretty: bool) -> Result<String> {
    let lines = reports
        .iter()
        .map(|report| to_json(report, pretty))
        .collect::<Result<Vec<_>>>()?;
    Ok(lines.join("\n"))
}
