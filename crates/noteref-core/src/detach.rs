//! Consumer teardown.
//!
//! Detaching takes a consumer off every waiter list it sits on. A fetch left with no
//! waiters gets its cancellation token fired, but its registry entry stays in place.
//! Only the completion handler removes entries, so a detach racing a completion can
//! never tear down a newer fetch for the same key.

use crate::consumer::ConsumerRef;
use crate::reference::CacheKey;
use crate::registry::InflightRegistry;

#[derive(Clone)]
pub struct DetachCoordinator {
    registry: InflightRegistry,
}

impl DetachCoordinator {
    pub fn new(registry: InflightRegistry) -> Self {
        Self { registry }
    }

    /// Returns the keys whose fetches were cancelled because nobody is waiting anymore.
    pub fn detach(&self, consumer: &ConsumerRef) -> Vec<CacheKey> {
        let abandoned: Vec<_> = {
            let mut state = self.registry.state.lock();
            state
                .inflight
                .iter_mut()
                .filter_map(|(key, request)| {
                    if !request.remove_waiter(consumer) {
                        return None;
                    }
                    request.prune_dead();
                    if request.waiters.is_empty() && !request.cancel.is_cancelled() {
                        Some((key.clone(), request.cancel.clone()))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (key, cancel) in &abandoned {
            tracing::debug!(key = %key, "no waiters left, cancelling fetch");
            cancel.cancel();
        }

        if !abandoned.is_empty() {
            let cancelled = abandoned.len() as u64;
            self.registry.stats.record(|s| s.cancellations += cancelled);
        }

        abandoned.into_iter().map(|(key, _)| key).collect()
    }
}
