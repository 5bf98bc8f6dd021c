//! Entry point for turning reference text into display metadata.
//!
//! A resolution either answers immediately (fallback, local hit, cache hit, or no
//! relays to ask) or registers the consumer on the relay fetch for the reference and
//! answers later through its callback.

use std::sync::Arc;

use nostr_sdk::{Event, JsonUtil};
use tokio::runtime::Handle;

use crate::cache::{CacheHit, ResultCache};
use crate::config::ResolverConfig;
use crate::consumer::ConsumerRef;
use crate::detach::DetachCoordinator;
use crate::metadata::{describe_event, unix_now, EmbedMetadata};
use crate::outcome::Outcome;
use crate::reference::{
    parse_or_unparseable, strip_uri_prefix, CacheKey, Nip19Parser, Reference, ReferenceParser,
};
use crate::registry::{Admission, FetchPlan, InflightRegistry};
use crate::relay::RelayQueryClient;
use crate::relay_urls::{build_relay_urls, RelaySource, StaticRelays};
use crate::stats::{ResolverStats, SharedResolverStats};
use crate::store::{lookup_reference, LocalStore};

/// How a call to [`ReferenceResolver::resolve_detailed`] was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveStatus {
    /// Answered on the spot; the consumer is not called for it
    Immediate(Outcome),
    /// Registered on a relay fetch. `provisional` says whether a local answer was
    /// already delivered to the consumer ahead of the final one.
    Pending { provisional: bool },
}

#[derive(Clone)]
pub struct ReferenceResolver {
    parser: Arc<dyn ReferenceParser>,
    store: Option<Arc<dyn LocalStore>>,
    relays: Arc<dyn RelaySource>,
    registry: InflightRegistry,
    detach: DetachCoordinator,
    confirm_local_online: bool,
    stats: SharedResolverStats,
}

impl ReferenceResolver {
    /// Fetches are spawned on `runtime`; completions run there too.
    pub fn new(config: &ResolverConfig, client: Arc<dyn RelayQueryClient>, runtime: Handle) -> Self {
        let stats = SharedResolverStats::new();
        let cache = ResultCache::new(config.cache_ttl(), config.cache_max_entries);
        let registry = InflightRegistry::new(cache, client, runtime, stats.clone());

        Self {
            parser: Arc::new(Nip19Parser),
            store: None,
            relays: Arc::new(StaticRelays(config.relays.clone())),
            detach: DetachCoordinator::new(registry.clone()),
            registry,
            confirm_local_online: config.confirm_local_online,
            stats,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.registry = self.registry.with_store(store.clone());
        self.detach = DetachCoordinator::new(self.registry.clone());
        self.store = Some(store);
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn ReferenceParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_relay_source(mut self, relays: Arc<dyn RelaySource>) -> Self {
        self.relays = relays;
        self
    }

    /// Resolve `raw_target` for `consumer`.
    ///
    /// `Some` is an immediate answer the caller applies itself; the consumer is not
    /// called for it. `None` means the consumer is registered on a relay fetch and
    /// will be called when it completes, unless it detaches or drops first.
    ///
    /// With `confirm_local_online`, a local hit is delivered to the consumer as a
    /// provisional result before the relays are asked. Only a relay hit replaces it:
    /// a failed or empty fetch hands the local answer back as the final one.
    pub fn resolve(&self, raw_target: &str, consumer: &ConsumerRef) -> Option<Outcome> {
        match self.resolve_detailed(raw_target, consumer) {
            ResolveStatus::Immediate(outcome) => Some(outcome),
            ResolveStatus::Pending { .. } => None,
        }
    }

    /// [`resolve`](Self::resolve), also reporting whether a provisional answer went out.
    pub fn resolve_detailed(&self, raw_target: &str, consumer: &ConsumerRef) -> ResolveStatus {
        let reference = self.parse(raw_target);
        let (Some(key), Some(plan)) = (reference.cache_key(), self.plan(&reference)) else {
            self.stats.record(|s| s.fallbacks += 1);
            return ResolveStatus::Immediate(Outcome::Reference(raw_target.to_string()));
        };

        let local = self.lookup_local(&key, &reference);
        if let Some(metadata) = &local {
            self.stats.record(|s| s.local_hits += 1);
            let provisional = Outcome::Resolved(metadata.clone());
            if !self.confirm_local_online {
                return ResolveStatus::Immediate(provisional);
            }
            consumer.deliver(&provisional);
        }

        let provisional = local.is_some();
        let unconfirmed = || local.clone().map_or(Outcome::NotFound, Outcome::Resolved);
        match self.registry.admit(key.clone(), plan, consumer.clone(), local.clone()) {
            Admission::Cached(CacheHit::Positive(metadata)) => {
                ResolveStatus::Immediate(Outcome::Resolved(metadata))
            }
            Admission::Cached(CacheHit::Negative) => ResolveStatus::Immediate(unconfirmed()),
            Admission::Joined | Admission::Started => ResolveStatus::Pending { provisional },
            Admission::NoRelays => {
                tracing::warn!(key = %key, "no relays to ask");
                ResolveStatus::Immediate(unconfirmed())
            }
        }
    }

    /// [`resolve`](Self::resolve), with immediate answers also delivered through the consumer.
    pub fn resolve_and_deliver(&self, raw_target: &str, consumer: &ConsumerRef) {
        if let Some(outcome) = self.resolve(raw_target, consumer) {
            consumer.deliver(&outcome);
        }
    }

    /// Take `consumer` off every pending fetch. Returns the keys whose fetches were
    /// cancelled for lack of waiters.
    pub fn detach(&self, consumer: &ConsumerRef) -> Vec<CacheKey> {
        self.detach.detach(consumer)
    }

    pub fn parse(&self, raw_target: &str) -> Reference {
        parse_or_unparseable(self.parser.as_ref(), strip_uri_prefix(raw_target))
    }

    /// Relay URLs a fetch for `reference` would ask, in order.
    pub fn relay_urls_for(&self, reference: &Reference) -> Vec<String> {
        build_relay_urls(reference.relay_hints(), &self.relays.relay_urls())
    }

    pub fn cached(&self, key: &CacheKey) -> Option<CacheHit> {
        self.registry.cached(key)
    }

    pub fn inflight_waiters(&self, key: &CacheKey) -> Option<usize> {
        self.registry.waiter_count(key)
    }

    pub fn inflight_len(&self) -> usize {
        self.registry.inflight_len()
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats.snapshot()
    }

    fn plan(&self, reference: &Reference) -> Option<FetchPlan> {
        FetchPlan::new(reference.clone(), &self.relays.relay_urls())
    }

    fn lookup_local(&self, key: &CacheKey, reference: &Reference) -> Option<Arc<EmbedMetadata>> {
        let store = self.store.as_deref()?;
        let json = match lookup_reference(store, reference) {
            Ok(json) => json?,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "local store lookup failed");
                return None;
            }
        };

        // Stored events were verified on ingest
        match Event::from_json(&json) {
            Ok(event) if reference.matches(&event) => {
                Some(Arc::new(describe_event(&event, Some(store), unix_now())))
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "stored event is unreadable");
                None
            }
        }
    }
}
