use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{CACHE_MAX_ENTRIES, CACHE_TTL_SECS, DEFAULT_RELAYS, QUERY_TIMEOUT_SECS};

/// Resolver tuning, loadable from a JSON file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverConfig {
    /// Globally configured relays, queried after any per-reference hints
    pub relays: Vec<String>,

    /// Seconds a network-confirmed result stays valid
    pub cache_ttl_secs: u64,

    /// Entry count that triggers a full cache clear
    pub cache_max_entries: usize,

    /// Seconds before a relay query is abandoned
    pub query_timeout_secs: u64,

    /// When a reference is found locally, still confirm it against relays
    pub confirm_local_online: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            cache_ttl_secs: CACHE_TTL_SECS,
            cache_max_entries: CACHE_MAX_ENTRIES,
            query_timeout_secs: QUERY_TIMEOUT_SECS,
            confirm_local_online: false,
        }
    }
}

impl ResolverConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize config")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize config")
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}
