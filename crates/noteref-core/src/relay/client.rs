use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use nostr_sdk::prelude::*;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{QueryError, QueryResult, RelayQueryClient};
use crate::relay_urls::normalize_relay_url;

/// Use counts for relays that only stay in the pool while some query needs them.
#[derive(Debug, Default)]
struct RelayLeases {
    persistent: HashSet<String>,
    active: HashMap<String, usize>,
}

impl RelayLeases {
    /// Take a lease on every non-persistent URL in `urls`; returns those URLs.
    fn acquire(&mut self, urls: &[String]) -> Vec<String> {
        let transient: Vec<String> = urls
            .iter()
            .filter(|url| !self.persistent.contains(&normalize_relay_url(url)))
            .cloned()
            .collect();
        for url in &transient {
            *self.active.entry(normalize_relay_url(url)).or_insert(0) += 1;
        }
        transient
    }

    /// Give back leases taken by [`acquire`](Self::acquire). Returns the URLs nobody
    /// uses anymore.
    fn release(&mut self, transient: &[String]) -> Vec<String> {
        let mut unused = Vec::new();
        for url in transient {
            let key = normalize_relay_url(url);
            if let Some(count) = self.active.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    self.active.remove(&key);
                    unused.push(url.clone());
                }
            }
        }
        unused
    }
}

/// Relay client backed by a shared `nostr_sdk::Client` pool.
///
/// Persistent relays (normally the configured list) stay connected between queries.
/// Any other URL, such as a relay hint taken from a note, is added for the queries
/// that need it and removed from the pool afterwards.
#[derive(Clone)]
pub struct NostrRelayClient {
    client: Client,
    timeout: Duration,
    leases: Arc<Mutex<RelayLeases>>,
}

impl NostrRelayClient {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(Client::builder().build(), timeout)
    }

    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            leases: Arc::new(Mutex::new(RelayLeases::default())),
        }
    }

    /// Relays kept in the pool across queries.
    pub fn with_persistent_relays(self, urls: &[String]) -> Self {
        let persistent = urls.iter().map(|url| normalize_relay_url(url)).collect();
        Self {
            leases: Arc::new(Mutex::new(RelayLeases {
                persistent,
                active: HashMap::new(),
            })),
            ..self
        }
    }

    /// Add `urls` to the pool. Returns the URLs that made it in and the transient
    /// leases to hand back to [`release`](Self::release).
    async fn lease(&self, urls: &[String]) -> (Vec<String>, Vec<String>) {
        let mut leases = self.leases.lock().await;
        let transient = leases.acquire(urls);

        let mut targets = Vec::with_capacity(urls.len());
        for url in urls {
            match self.client.add_relay(url.as_str()).await {
                Ok(_) => targets.push(url.clone()),
                Err(e) => tracing::warn!(url = %url, error = %e, "skipping relay"),
            }
        }
        (targets, transient)
    }

    async fn release(&self, transient: &[String]) {
        let mut leases = self.leases.lock().await;
        for url in leases.release(transient) {
            if let Err(e) = self.client.remove_relay(url.as_str()).await {
                tracing::debug!(url = %url, error = %e, "transient relay already gone");
            }
        }
    }
}

impl RelayQueryClient for NostrRelayClient {
    fn query_first(
        &self,
        urls: Vec<String>,
        filter: Filter,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, QueryResult> {
        let this = self.clone();

        Box::pin(async move {
            let (targets, transient) = this.lease(&urls).await;

            // The SDK's own timeout returns whatever arrived; the outer one catches
            // relays that never finish connecting.
            let fetch = tokio::time::timeout(
                this.timeout.saturating_mul(2),
                fetch_first(&this.client, targets, filter, this.timeout),
            );
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(QueryError::Cancelled),
                result = fetch => result.unwrap_or(Err(QueryError::Timeout)),
            };

            this.release(&transient).await;
            result
        })
    }
}

async fn fetch_first(
    client: &Client,
    targets: Vec<String>,
    filter: Filter,
    timeout: Duration,
) -> QueryResult {
    if targets.is_empty() {
        return Err(QueryError::NoRelays);
    }

    client.connect().await;

    let started = std::time::Instant::now();
    let events = client
        .fetch_events_from(targets.iter().map(String::as_str), filter, timeout)
        .await
        .map_err(|e| QueryError::Transport(e.to_string()))?;
    tracing::debug!(
        relays = targets.len(),
        events = events.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "relay query finished"
    );

    Ok(events.into_iter().next().map(|event| event.as_json()))
}
