//! Relay query contract used by the inflight registry.

pub mod client;

use futures::future::BoxFuture;
use nostr_sdk::Filter;
use tokio_util::sync::CancellationToken;

pub use client::NostrRelayClient;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Query cancelled")]
    Cancelled,

    #[error("Query timed out")]
    Timeout,

    #[error("No usable relays")]
    NoRelays,

    #[error("Relay transport error: {0}")]
    Transport(String),
}

/// Raw JSON of the first matching event, `None` for a definitive empty answer.
pub type QueryResult = Result<Option<String>, QueryError>;

pub trait RelayQueryClient: Send + Sync {
    /// Ask `urls` for the first event matching `filter`.
    ///
    /// Cancellation is advisory: an implementation should stop early once `cancel`
    /// fires and report [`QueryError::Cancelled`], but may still return a result.
    fn query_first(
        &self,
        urls: Vec<String>,
        filter: Filter,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, QueryResult>;
}
