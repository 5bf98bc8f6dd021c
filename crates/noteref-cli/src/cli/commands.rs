use std::sync::Arc;

use anyhow::{Context, Result};
use noteref_core::stats::ResolverStats;
use noteref_core::{
    ChannelConsumer, ConsumerRef, NostrRelayClient, ReferenceResolver, ResolveStatus,
    SqliteStore,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::config::CliConfig;
use super::output::{ResolveReport, Source};

/// Build a resolver backed by live relays and, when a data directory is known, the
/// SQLite event store in it.
pub fn build_resolver(config: &CliConfig, use_store: bool) -> Result<ReferenceResolver> {
    let client = Arc::new(
        NostrRelayClient::new(config.resolver.query_timeout())
            .with_persistent_relays(&config.resolver.relays),
    );
    let resolver = ReferenceResolver::new(&config.resolver, client, Handle::current());

    if !use_store {
        return Ok(resolver);
    }
    let Some(dir) = config.store_dir() else {
        tracing::warn!("no data directory available, running without a local store");
        return Ok(resolver);
    };
    let store = SqliteStore::open(&dir)
        .with_context(|| format!("Failed to open event store in {}", dir.display()))?;
    tracing::debug!(dir = %dir.display(), "using local event store");
    Ok(resolver.with_store(Arc::new(store)))
}

/// Resolve every reference through `resolver` and wait for the pending ones.
///
/// Repeated references share one fetch. Reports come back in input order.
pub async fn resolve_all(resolver: &ReferenceResolver, refs: &[String]) -> Vec<ResolveReport> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let consumers: Vec<_> = (0..refs.len())
        .map(|index| Arc::new(ChannelConsumer::new(index, tx.clone())))
        .collect();
    drop(tx);

    let mut reports: Vec<Option<ResolveReport>> = vec![None; refs.len()];
    let mut expected = vec![0usize; refs.len()];

    for (index, raw) in refs.iter().enumerate() {
        let key = resolver.parse(raw).cache_key();

        match resolver.resolve_detailed(raw, &ConsumerRef::new(&consumers[index])) {
            ResolveStatus::Immediate(outcome) => {
                reports[index] = Some(ResolveReport::new(raw, key.as_ref(), &outcome, Source::Immediate));
            }
            // A provisional local answer arrives ahead of the final one
            ResolveStatus::Pending { provisional } => {
                expected[index] = if provisional { 2 } else { 1 };
            }
        }
    }

    let mut pending: usize = expected.iter().sum();
    while pending > 0 {
        let Some((index, outcome)) = rx.recv().await else {
            break;
        };
        if expected[index] == 0 {
            continue;
        }
        expected[index] -= 1;
        pending -= 1;

        let raw = &refs[index];
        let key = resolver.parse(raw).cache_key();
        reports[index] = Some(ResolveReport::new(raw, key.as_ref(), &outcome, Source::Relay));
    }

    refs.iter()
        .zip(reports)
        .map(|(raw, report)| {
            report.unwrap_or_else(|| {
                ResolveReport::new(raw, None, &noteref_core::Outcome::NotFound, Source::Relay)
            })
        })
        .collect()
}

pub async fn run_resolve(
    config: &CliConfig,
    refs: &[String],
    use_store: bool,
) -> Result<(Vec<ResolveReport>, ResolverStats)> {
    let resolver = build_resolver(config, use_store)?;
    let reports = resolve_all(&resolver, refs).await;
    Ok((reports, resolver.stats()))
}

/// Canonical cache key of `raw`, or an error for unparseable input.
pub fn cache_key(resolver: &ReferenceResolver, raw: &str) -> Result<String> {
    resolver
        .parse(raw)
        .cache_key()
        .map(|key| key.as_str().to_string())
        .with_context(|| format!("Not a resolvable reference: {raw}"))
}

/// Relays a fetch for `raw` would ask, hints first.
pub fn relay_urls(resolver: &ReferenceResolver, raw: &str) -> Result<Vec<String>> {
    let reference = resolver.parse(raw);
    if reference.is_unparseable() {
        anyhow::bail!("Not a resolvable reference: {raw}");
    }
    Ok(resolver.relay_urls_for(&reference))
}
