//! The callback surface UI rows implement, and the non-owning handle the
//! resolver keeps to them.

use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::mpsc::UnboundedSender;

use crate::metadata::EmbedMetadata;
use crate::outcome::Outcome;

/// Receives the result of a resolution. Called from whichever thread completes
/// the fetch, never while resolver locks are held.
pub trait ResolveConsumer: Send + Sync {
    fn on_resolved(&self, metadata: &EmbedMetadata);
    fn on_not_found(&self);
    /// Input could not be parsed; show `raw_text` as a plain reference.
    fn on_reference(&self, raw_text: &str);
}

/// Weak handle to a consumer. Holding one never keeps the consumer alive.
#[derive(Clone)]
pub struct ConsumerRef {
    target: Weak<dyn ResolveConsumer>,
}

impl ConsumerRef {
    pub fn new<C: ResolveConsumer + 'static>(consumer: &Arc<C>) -> Self {
        let weak: Weak<C> = Arc::downgrade(consumer);
        Self { target: weak }
    }

    pub fn upgrade(&self) -> Option<Arc<dyn ResolveConsumer>> {
        self.target.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Identity comparison; two handles to the same consumer are equal even after it drops.
    pub fn same_consumer(&self, other: &ConsumerRef) -> bool {
        Weak::ptr_eq(&self.target, &other.target)
    }

    /// Deliver `outcome` if the consumer still exists. Returns whether it did.
    pub fn deliver(&self, outcome: &Outcome) -> bool {
        match self.upgrade() {
            Some(consumer) => {
                outcome.deliver(consumer.as_ref());
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ConsumerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRef")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Consumer that forwards every outcome, tagged, into a channel. Lets an event loop
/// receive results on its own thread.
pub struct ChannelConsumer<T> {
    tag: T,
    tx: UnboundedSender<(T, Outcome)>,
}

impl<T> ChannelConsumer<T> {
    pub fn new(tag: T, tx: UnboundedSender<(T, Outcome)>) -> Self {
        Self { tag, tx }
    }
}

impl<T: Clone + Send + Sync> ChannelConsumer<T> {
    fn send(&self, outcome: Outcome) {
        // The receiver going away just means nobody is listening anymore
        let _ = self.tx.send((self.tag.clone(), outcome));
    }
}

impl<T: Clone + Send + Sync> ResolveConsumer for ChannelConsumer<T> {
    fn on_resolved(&self, metadata: &EmbedMetadata) {
        self.send(Outcome::Resolved(Arc::new(metadata.clone())));
    }

    fn on_not_found(&self) {
        self.send(Outcome::NotFound);
    }

    fn on_reference(&self, raw_text: &str) {
        self.send(Outcome::Reference(raw_text.to_string()));
    }
}
