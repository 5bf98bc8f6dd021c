//! Request coalescing for relay fetches.
//!
//! At most one fetch runs per [`CacheKey`]. Consumers asking for a key that is
//! already being fetched are added to that fetch's waiter list instead of
//! starting another query. Waiters are held weakly.
//!
//! Registry and result cache share one lock ([`ResolverState`]). Completion writes
//! the cache and removes the inflight entry inside a single critical section and only
//! then notifies waiters, outside the lock. A consumer that re-resolves from inside
//! its callback therefore sees either the fresh cache entry or no entry at all.
//!
//! Each inflight entry carries a generation number. A completion only tears down
//! the entry it started, so a late or duplicated completion is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use nostr_sdk::Filter;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheHit, ResultCache};
use crate::consumer::ConsumerRef;
use crate::metadata::{decode_event, describe_event, unix_now, EmbedMetadata};
use crate::outcome::Outcome;
use crate::reference::{CacheKey, Reference};
use crate::relay::{QueryError, QueryResult, RelayQueryClient};
use crate::relay_urls::build_relay_urls;
use crate::stats::SharedResolverStats;
use crate::store::LocalStore;

/// Everything needed to (re)issue the relay query for one reference.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub reference: Reference,
    pub urls: Vec<String>,
    pub filter: Filter,
}

impl FetchPlan {
    /// Hints first, then `configured`. `None` for references that cannot be fetched.
    pub fn new(reference: Reference, configured: &[String]) -> Option<Self> {
        let filter = reference.filter()?;
        let urls = build_relay_urls(reference.relay_hints(), configured);
        Some(Self {
            reference,
            urls,
            filter,
        })
    }
}

/// How a request was admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Answered from the result cache; no waiter registered
    Cached(CacheHit),
    /// Attached to the fetch already running for the key
    Joined,
    /// First waiter; a new fetch was started
    Started,
    /// Nothing running and no relay to ask
    NoRelays,
}

pub(crate) struct Waiter {
    consumer: ConsumerRef,
    /// Local answer this consumer was already shown. Only a relay hit replaces it.
    local: Option<Arc<EmbedMetadata>>,
}

impl Waiter {
    fn final_outcome(&self, resolution: &Resolution) -> Outcome {
        match (resolution, &self.local) {
            (Resolution::Found(_), _) | (_, None) => resolution.outcome(),
            (_, Some(local)) => Outcome::Resolved(local.clone()),
        }
    }
}

pub(crate) struct InflightRequest {
    generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) waiters: Vec<Waiter>,
    plan: FetchPlan,
}

impl InflightRequest {
    /// Set semantics: a consumer already waiting is not added twice.
    fn add_waiter(&mut self, consumer: ConsumerRef, local: Option<Arc<EmbedMetadata>>) {
        match self.waiters.iter_mut().find(|w| w.consumer.same_consumer(&consumer)) {
            Some(waiter) => {
                if local.is_some() {
                    waiter.local = local;
                }
            }
            None => self.waiters.push(Waiter { consumer, local }),
        }
    }

    pub(crate) fn remove_waiter(&mut self, consumer: &ConsumerRef) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|w| !w.consumer.same_consumer(consumer));
        self.waiters.len() != before
    }

    pub(crate) fn prune_dead(&mut self) {
        self.waiters.retain(|w| w.consumer.is_alive());
    }
}

pub(crate) struct ResolverState {
    pub(crate) inflight: HashMap<CacheKey, InflightRequest>,
    pub(crate) cache: ResultCache,
    next_generation: u64,
}

impl ResolverState {
    fn new(cache: ResultCache) -> Self {
        Self {
            inflight: HashMap::new(),
            cache,
            next_generation: 0,
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// A fetch registered under the lock, to be spawned once the lock is released.
struct PendingFetch {
    key: CacheKey,
    generation: u64,
    cancel: CancellationToken,
    plan: FetchPlan,
}

/// Interpreted result of one relay query.
enum Resolution {
    Found(Arc<EmbedMetadata>),
    /// Definitive empty answer, or an answer that is not a valid matching event
    Missing,
    /// Transport error, timeout or cancellation; never cached
    Failed(QueryError),
}

impl Resolution {
    fn outcome(&self) -> Outcome {
        match self {
            Resolution::Found(metadata) => Outcome::Resolved(metadata.clone()),
            Resolution::Missing | Resolution::Failed(_) => Outcome::NotFound,
        }
    }
}

#[derive(Clone)]
pub struct InflightRegistry {
    pub(crate) state: Arc<Mutex<ResolverState>>,
    client: Arc<dyn RelayQueryClient>,
    store: Option<Arc<dyn LocalStore>>,
    runtime: Handle,
    pub(crate) stats: SharedResolverStats,
}

impl InflightRegistry {
    pub fn new(
        cache: ResultCache,
        client: Arc<dyn RelayQueryClient>,
        runtime: Handle,
        stats: SharedResolverStats,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ResolverState::new(cache))),
            client,
            store: None,
            runtime,
            stats,
        }
    }

    /// Fetched events are ingested into `store`, and authors are looked up there.
    pub fn with_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Join the running fetch for `key` or start one. Does not consult the cache.
    pub fn join_or_start(&self, key: CacheKey, plan: FetchPlan, consumer: ConsumerRef) -> Admission {
        let (admission, pending) = {
            let mut state = self.state.lock();
            self.join_or_start_locked(&mut state, key, plan, consumer, None)
        };
        self.finish_admission(&admission, pending);
        admission
    }

    /// Cache lookup followed by join-or-start, atomically with respect to completions.
    ///
    /// `local` is a provisional answer the consumer already received from the local
    /// store. If the fetch fails or finds nothing, the consumer gets that answer back
    /// instead of NotFound.
    pub fn admit(
        &self,
        key: CacheKey,
        plan: FetchPlan,
        consumer: ConsumerRef,
        local: Option<Arc<EmbedMetadata>>,
    ) -> Admission {
        let (admission, pending) = {
            let mut state = self.state.lock();
            match state.cache.get(&key) {
                Some(hit) => (Admission::Cached(hit), None),
                None => self.join_or_start_locked(&mut state, key, plan, consumer, local),
            }
        };
        self.finish_admission(&admission, pending);
        admission
    }

    fn join_or_start_locked(
        &self,
        state: &mut ResolverState,
        key: CacheKey,
        plan: FetchPlan,
        consumer: ConsumerRef,
        local: Option<Arc<EmbedMetadata>>,
    ) -> (Admission, Option<PendingFetch>) {
        if let Some(request) = state.inflight.get_mut(&key) {
            request.add_waiter(consumer, local);
            tracing::debug!(key = %key, waiters = request.waiters.len(), "joined inflight fetch");
            return (Admission::Joined, None);
        }

        if plan.urls.is_empty() {
            return (Admission::NoRelays, None);
        }

        let generation = state.next_generation();
        let cancel = CancellationToken::new();
        state.inflight.insert(
            key.clone(),
            InflightRequest {
                generation,
                cancel: cancel.clone(),
                waiters: vec![Waiter { consumer, local }],
                plan: plan.clone(),
            },
        );
        tracing::debug!(key = %key, relays = plan.urls.len(), "starting relay fetch");

        let pending = PendingFetch {
            key,
            generation,
            cancel,
            plan,
        };
        (Admission::Started, Some(pending))
    }

    fn finish_admission(&self, admission: &Admission, pending: Option<PendingFetch>) {
        self.stats.record(|s| match admission {
            Admission::Cached(CacheHit::Positive(_)) => s.cache_hits_positive += 1,
            Admission::Cached(CacheHit::Negative) => s.cache_hits_negative += 1,
            Admission::Joined => {
                s.cache_misses += 1;
                s.joins += 1;
            }
            Admission::Started => {
                s.cache_misses += 1;
                s.queries_started += 1;
            }
            Admission::NoRelays => s.cache_misses += 1,
        });

        if let Some(pending) = pending {
            self.spawn_fetch(pending);
        }
    }

    fn spawn_fetch(&self, pending: PendingFetch) {
        let PendingFetch {
            key,
            generation,
            cancel,
            plan,
        } = pending;

        let query = self
            .client
            .query_first(plan.urls.clone(), plan.filter.clone(), cancel);
        let registry = self.clone();
        self.runtime.spawn(async move {
            let result = query.await;
            // Completion touches the local store and runs consumer callbacks
            let completion = tokio::task::spawn_blocking(move || {
                registry.complete(&key, generation, &plan.reference, result)
            });
            if let Err(e) = completion.await {
                tracing::warn!(error = %e, "completion handler failed");
            }
        });
    }

    /// Completion handler: cache, tear down, notify. Runs once per started fetch.
    pub(crate) fn complete(
        &self,
        key: &CacheKey,
        generation: u64,
        reference: &Reference,
        result: QueryResult,
    ) {
        let resolution = self.interpret(key, reference, result);

        let (waiters, restart, cleared) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let is_current =
                state.inflight.get(key).map(|r| r.generation) == Some(generation);
            if !is_current {
                tracing::debug!(key = %key, generation, "inflight entry already torn down");
                return;
            }

            let cleared = match &resolution {
                Resolution::Found(metadata) => state.cache.put_positive(key.clone(), metadata.clone()),
                Resolution::Missing => state.cache.put_negative(key.clone()),
                Resolution::Failed(_) => false,
            };

            if let Some(pending) = Self::restart_if_rejoined(state, key, &resolution) {
                (Vec::new(), Some(pending), cleared)
            } else {
                let waiters = state
                    .inflight
                    .remove(key)
                    .map(|request| request.waiters)
                    .unwrap_or_default();
                (waiters, None, cleared)
            }
        };

        self.stats.record(|s| {
            match &resolution {
                Resolution::Found(_) => s.completions_found += 1,
                Resolution::Missing => s.completions_not_found += 1,
                Resolution::Failed(_) => s.completions_failed += 1,
            }
            if cleared {
                s.cache_clears += 1;
            }
        });

        if let Some(pending) = restart {
            tracing::debug!(key = %key, "fetch was cancelled but gained new waiters, restarting");
            self.spawn_fetch(pending);
            return;
        }

        let delivered = waiters
            .iter()
            .filter(|w| w.consumer.deliver(&w.final_outcome(&resolution)))
            .count();
        tracing::debug!(
            key = %key,
            outcome = resolution.outcome().status(),
            waiters = waiters.len(),
            delivered,
            "relay fetch completed"
        );
    }

    /// A cancelled fetch that picked up live waiters after cancellation is re-issued
    /// under a new generation instead of reporting the cancellation to them.
    fn restart_if_rejoined(
        state: &mut ResolverState,
        key: &CacheKey,
        resolution: &Resolution,
    ) -> Option<PendingFetch> {
        if !matches!(resolution, Resolution::Failed(QueryError::Cancelled)) {
            return None;
        }

        let generation = state.next_generation();
        let request = state.inflight.get_mut(key)?;
        request.prune_dead();
        if request.waiters.is_empty() {
            return None;
        }

        request.generation = generation;
        request.cancel = CancellationToken::new();
        Some(PendingFetch {
            key: key.clone(),
            generation,
            cancel: request.cancel.clone(),
            plan: request.plan.clone(),
        })
    }

    fn interpret(&self, key: &CacheKey, reference: &Reference, result: QueryResult) -> Resolution {
        let json = match result {
            Ok(Some(json)) => json,
            Ok(None) => return Resolution::Missing,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "relay fetch failed, not caching");
                return Resolution::Failed(e);
            }
        };

        let event = match decode_event(&json) {
            Ok(event) if reference.matches(&event) => event,
            Ok(event) => {
                tracing::warn!(key = %key, got = %event.id, "relay answered with a non-matching event");
                return Resolution::Missing;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "relay answered with an undecodable event");
                return Resolution::Missing;
            }
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.ingest(&json) {
                tracing::warn!(key = %key, error = %e, "failed to ingest fetched event");
            }
        }

        let metadata = describe_event(&event, self.store.as_deref(), unix_now());
        Resolution::Found(Arc::new(metadata))
    }

    pub fn cached(&self, key: &CacheKey) -> Option<CacheHit> {
        self.state.lock().cache.get(key)
    }

    /// Waiters registered on the fetch for `key`, if one is running.
    pub fn waiter_count(&self, key: &CacheKey) -> Option<usize> {
        self.state.lock().inflight.get(key).map(|r| r.waiters.len())
    }

    pub fn inflight_len(&self) -> usize {
        self.state.lock().inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ChannelConsumer;
    use crate::testing::{next_outcome, signed_note, wait_until, ScriptedRelayClient};
    use crate::store::{MemoryStore, StoreError};
    use nostr_sdk::{EventId, JsonUtil, PublicKey};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn registry(client: &ScriptedRelayClient) -> InflightRegistry {
        InflightRegistry::new(
            ResultCache::new(Duration::from_secs(60), 100),
            Arc::new(client.clone()),
            Handle::current(),
            SharedResolverStats::new(),
        )
    }

    fn plan_for(reference: &Reference) -> FetchPlan {
        FetchPlan::new(reference.clone(), &["wss://relay.example.com".to_string()]).unwrap()
    }

    #[tokio::test]
    async fn test_joiners_share_one_query() {
        let client = ScriptedRelayClient::default();
        let registry = registry(&client);
        let event = signed_note("shared");
        let reference = Reference::NoteId { id: event.id };
        let key = reference.cache_key().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumers: Vec<_> = (0..5)
            .map(|i| Arc::new(ChannelConsumer::new(i, tx.clone())))
            .collect();

        let admissions: Vec<_> = consumers
            .iter()
            .map(|c| registry.join_or_start(key.clone(), plan_for(&reference), ConsumerRef::new(c)))
            .collect();

        assert_eq!(admissions[0], Admission::Started);
        assert!(admissions[1..].iter().all(|a| *a == Admission::Joined));
        assert_eq!(client.query_count(), 1);
        assert_eq!(registry.waiter_count(&key), Some(5));

        client.reply(0, Ok(Some(event.as_json())));

        let mut tags = Vec::new();
        for _ in 0..5 {
            let (tag, outcome) = next_outcome(&mut rx).await;
            assert_eq!(outcome.metadata().unwrap().event_id, event.id.to_hex());
            tags.push(tag);
        }
        tags.sort();
        assert_eq!(tags, vec![0, 1, 2, 3, 4]);
        assert_eq!(registry.inflight_len(), 0);
        assert!(matches!(registry.cached(&key), Some(CacheHit::Positive(_))));
    }

    #[tokio::test]
    async fn test_same_consumer_is_registered_once() {
        let client = ScriptedRelayClient::default();
        let registry = registry(&client);
        let reference = Reference::NoteId { id: signed_note("x").id };
        let key = reference.cache_key().unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(ChannelConsumer::new(0u8, tx));
        let handle = ConsumerRef::new(&consumer);

        registry.join_or_start(key.clone(), plan_for(&reference), handle.clone());
        registry.join_or_start(key.clone(), plan_for(&reference), handle);
        assert_eq!(registry.waiter_count(&key), Some(1));
    }

    #[tokio::test]
    async fn test_no_relays_registers_nothing() {
        let client = ScriptedRelayClient::default();
        let registry = registry(&client);
        let reference = Reference::NoteId { id: signed_note("x").id };
        let key = reference.cache_key().unwrap();
        let plan = FetchPlan::new(reference, &[]).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(ChannelConsumer::new(0u8, tx));

        assert_eq!(
            registry.join_or_start(key.clone(), plan, ConsumerRef::new(&consumer)),
            Admission::NoRelays
        );
        assert_eq!(client.query_count(), 0);
        assert_eq!(registry.waiter_count(&key), None);
    }

    #[tokio::test]
    async fn test_mismatched_answer_is_cached_negative() {
        let client = ScriptedRelayClient::default();
        let registry = registry(&client);
        let wanted = signed_note("wanted");
        let other = signed_note("other");
        let reference = Reference::NoteId { id: wanted.id };
        let key = reference.cache_key().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(ChannelConsumer::new(0u8, tx));
        registry.join_or_start(key.clone(), plan_for(&reference), ConsumerRef::new(&consumer));

        client.reply(0, Ok(Some(other.as_json())));
        assert_eq!(next_outcome(&mut rx).await.1, Outcome::NotFound);
        assert_eq!(registry.cached(&key), Some(CacheHit::Negative));
    }

    #[tokio::test]
    async fn test_transport_error_is_not_cached() {
        let client = ScriptedRelayClient::default();
        let registry = registry(&client);
        let reference = Reference::NoteId { id: signed_note("x").id };
        let key = reference.cache_key().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(ChannelConsumer::new(0u8, tx));
        registry.join_or_start(key.clone(), plan_for(&reference), ConsumerRef::new(&consumer));

        client.reply(0, Err(QueryError::Transport("connection reset".to_string())));
        assert_eq!(next_outcome(&mut rx).await.1, Outcome::NotFound);
        assert_eq!(registry.cached(&key), None);
        assert_eq!(registry.inflight_len(), 0);
    }

    #[tokio::test]
    async fn test_stale_completion_is_a_no_op() {
        let client = ScriptedRelayClient::default();
        let registry = registry(&client);
        let event = signed_note("fresh");
        let reference = Reference::NoteId { id: event.id };
        let key = reference.cache_key().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(ChannelConsumer::new(0u8, tx));
        registry.join_or_start(key.clone(), plan_for(&reference), ConsumerRef::new(&consumer));

        client.reply(0, Ok(Some(event.as_json())));
        next_outcome(&mut rx).await;

        // A second completion for a generation that no longer exists changes nothing
        registry.complete(&key, 1, &reference, Ok(None));
        assert!(matches!(registry.cached(&key), Some(CacheHit::Positive(_))));
        assert_eq!(registry.inflight_len(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_fetch_restarts_for_late_joiner() {
        let client = ScriptedRelayClient::default();
        let registry = registry(&client);
        let event = signed_note("late");
        let reference = Reference::NoteId { id: event.id };
        let key = reference.cache_key().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = Arc::new(ChannelConsumer::new(1u8, tx.clone()));
        registry.join_or_start(key.clone(), plan_for(&reference), ConsumerRef::new(&first));

        // Everybody left: the token fires but the entry stays until completion
        {
            let mut state = registry.state.lock();
            if let Some(request) = state.inflight.get_mut(&key) {
                request.waiters.clear();
                request.cancel.cancel();
            }
        }
        assert!(client.cancel_token(0).is_cancelled());

        let second = Arc::new(ChannelConsumer::new(2u8, tx));
        assert_eq!(
            registry.join_or_start(key.clone(), plan_for(&reference), ConsumerRef::new(&second)),
            Admission::Joined
        );

        client.reply(0, Err(QueryError::Cancelled));
        wait_until(|| client.query_count() == 2).await;
        assert_eq!(registry.inflight_len(), 1);
        assert!(!client.cancel_token(1).is_cancelled());

        client.reply(1, Ok(Some(event.as_json())));
        let (tag, outcome) = next_outcome(&mut rx).await;
        assert_eq!(tag, 2);
        assert_eq!(outcome.status(), "resolved");
        assert_eq!(registry.inflight_len(), 0);
    }

    #[tokio::test]
    async fn test_local_answer_survives_failed_fetch() {
        let client = ScriptedRelayClient::default();
        let registry = registry(&client);
        let event = signed_note("kept locally");
        let reference = Reference::NoteId { id: event.id };
        let key = reference.cache_key().unwrap();
        let local = Arc::new(EmbedMetadata::from_event(&event, None, unix_now()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let shown = Arc::new(ChannelConsumer::new("shown", tx.clone()));
        let fresh = Arc::new(ChannelConsumer::new("fresh", tx));
        registry.admit(key.clone(), plan_for(&reference), ConsumerRef::new(&shown), Some(local));
        registry.admit(key.clone(), plan_for(&reference), ConsumerRef::new(&fresh), None);

        client.reply(0, Err(QueryError::Timeout));
        let mut outcomes = Vec::new();
        for _ in 0..2 {
            outcomes.push(next_outcome(&mut rx).await);
        }
        outcomes.sort_by_key(|(tag, _)| *tag);

        assert_eq!(outcomes[0].0, "fresh");
        assert_eq!(outcomes[0].1, Outcome::NotFound);
        assert_eq!(outcomes[1].0, "shown");
        assert_eq!(outcomes[1].1.metadata().unwrap().event_id, event.id.to_hex());
        assert_eq!(registry.cached(&key), None);
    }

    /// Store whose ingest blocks until the test lets it continue.
    struct GatedStore {
        inner: MemoryStore,
        entered: AtomicBool,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl LocalStore for GatedStore {
        fn get_by_id(&self, id: &EventId) -> Result<Option<String>, StoreError> {
            self.inner.get_by_id(id)
        }

        fn get_by_coordinate(
            &self,
            kind: u16,
            pubkey: &PublicKey,
            d_tag: &str,
        ) -> Result<Option<String>, StoreError> {
            self.inner.get_by_coordinate(kind, pubkey, d_tag)
        }

        fn ingest(&self, json: &str) -> Result<bool, StoreError> {
            self.entered.store(true, Ordering::SeqCst);
            let _ = self.release.lock().recv_timeout(Duration::from_secs(5));
            self.entered.store(false, Ordering::SeqCst);
            self.inner.ingest(json)
        }
    }

    #[tokio::test]
    async fn test_store_work_does_not_stall_the_runtime() {
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            entered: AtomicBool::new(false),
            release: Mutex::new(release_rx),
        });
        let client = ScriptedRelayClient::default();
        let registry = registry(&client).with_store(store.clone());
        let event = signed_note("slow disk");
        let reference = Reference::NoteId { id: event.id };
        let key = reference.cache_key().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(ChannelConsumer::new(0u8, tx));
        registry.join_or_start(key, plan_for(&reference), ConsumerRef::new(&consumer));
        client.reply(0, Ok(Some(event.as_json())));

        // This task keeps running while ingest is blocked
        wait_until(|| store.entered.load(Ordering::SeqCst)).await;
        release_tx.send(()).unwrap();

        assert_eq!(next_outcome(&mut rx).await.1.status(), "resolved");
        assert!(store.inner.get_by_id(&event.id).unwrap().is_some());
    }
}
