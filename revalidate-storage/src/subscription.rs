//! Change feed shared by the contexts of one store, and per-key subscriptions.

use tokio::sync::broadcast;

use crate::traits::{ContextId, StoreChange};

/// Default number of buffered notifications before slow subscribers lag.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// Broadcast channel carrying every mutation of a store.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<StoreChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Announce a mutation. Having no subscribers is fine.
    pub fn publish(&self, change: StoreChange) {
        let _ = self.tx.send(change);
    }

    /// Open a subscription for `key` as seen from `context`.
    pub fn subscribe(&self, key: &str, context: ContextId) -> StoreSubscription {
        StoreSubscription {
            key: key.to_string(),
            context,
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

/// What a subscription observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Another context wrote the watched key.
    Changed(StoreChange),
    /// Notifications were dropped; the subscriber should re-read the key.
    Lagged(u64),
}

/// Handle on a key's change notifications.
///
/// Writes made by the subscribing context itself are filtered out. Dropping
/// the handle disposes of the subscription.
#[derive(Debug)]
pub struct StoreSubscription {
    key: String,
    context: ContextId,
    rx: broadcast::Receiver<StoreChange>,
}

impl StoreSubscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the next relevant event. Returns `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.key == self.key && change.origin != self.context => {
                    return Some(StoreEvent::Changed(change));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(key = %self.key, missed, "Store change feed lagged");
                    return Some(StoreEvent::Lagged(missed));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
