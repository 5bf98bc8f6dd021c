//! Test doubles shared by the resolver test modules.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::outcome::Outcome;
use crate::relay::{QueryError, QueryResult, RelayQueryClient};

struct ScriptedQuery {
    urls: Vec<String>,
    filter: Filter,
    cancel: CancellationToken,
    reply: Option<oneshot::Sender<QueryResult>>,
}

/// Relay client whose queries stay pending until the test answers them by index.
#[derive(Clone, Default)]
pub(crate) struct ScriptedRelayClient {
    queries: Arc<Mutex<Vec<ScriptedQuery>>>,
}

impl ScriptedRelayClient {
    pub(crate) fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub(crate) fn urls(&self, index: usize) -> Vec<String> {
        self.queries.lock()[index].urls.clone()
    }

    pub(crate) fn filter(&self, index: usize) -> Filter {
        self.queries.lock()[index].filter.clone()
    }

    pub(crate) fn cancel_token(&self, index: usize) -> CancellationToken {
        self.queries.lock()[index].cancel.clone()
    }

    pub(crate) fn reply(&self, index: usize, result: QueryResult) {
        let sender = self.queries.lock()[index]
            .reply
            .take()
            .expect("query already answered");
        let _ = sender.send(result);
    }
}

impl RelayQueryClient for ScriptedRelayClient {
    fn query_first(
        &self,
        urls: Vec<String>,
        filter: Filter,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, QueryResult> {
        let (tx, rx) = oneshot::channel();
        self.queries.lock().push(ScriptedQuery {
            urls,
            filter,
            cancel,
            reply: Some(tx),
        });
        Box::pin(async move {
            rx.await
                .unwrap_or_else(|_| Err(QueryError::Transport("reply dropped".to_string())))
        })
    }
}

pub(crate) fn signed_note(content: &str) -> Event {
    EventBuilder::new(Kind::from(1), content)
        .sign_with_keys(&Keys::generate())
        .unwrap()
}

/// Next outcome delivered to any consumer on `rx`, failing the test after two seconds.
pub(crate) async fn next_outcome<T>(rx: &mut mpsc::UnboundedReceiver<(T, Outcome)>) -> (T, Outcome) {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for outcome")
        .expect("consumer channel closed")
}

/// Poll `condition` while letting spawned tasks run.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
