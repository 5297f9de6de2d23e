//! Background tasks owned by a cached fetch instance.
//!
//! Both tasks hold only a `Weak` reference to the instance and stop on the
//! shutdown signal, when the instance is dropped, or when their source
//! closes.

use std::sync::Weak;
use std::time::Duration;

use revalidate_core::Cacheable;
use revalidate_storage::{KeyValueStore, StoreEvent, StoreSubscription};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::cached_fetch::Inner;

/// Fire a background fetch every `period` while data is held and no fetch
/// is in flight.
pub(crate) async fn refresh_timer<T, S>(
    inner: Weak<Inner<T, S>>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    T: Cacheable,
    S: KeyValueStore + 'static,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!(period_ms = period.as_millis() as u64, "Refresh timer started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                if inner.wants_refresh() {
                    tracing::trace!(key = %inner.key, "Refresh timer fired");
                    drop(inner.start_fetch(true));
                }
            }
        }
    }

    tracing::debug!("Refresh timer stopped");
}

/// Re-read the store whenever another context changes the watched key.
pub(crate) async fn sync_listener<T, S>(
    inner: Weak<Inner<T, S>>,
    mut subscription: StoreSubscription,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    T: Cacheable,
    S: KeyValueStore + 'static,
{
    loop {
        let event = tokio::select! {
            _ = shutdown_rx.changed() => break,
            event = subscription.recv() => event,
        };

        let Some(event) = event else { break };
        let Some(inner) = inner.upgrade() else { break };

        match event {
            StoreEvent::Changed(change) => {
                tracing::trace!(key = %inner.key, origin = %change.origin, "External change");
            }
            StoreEvent::Lagged(missed) => {
                tracing::debug!(key = %inner.key, missed, "Resyncing after lag");
            }
        }
        inner.adopt_external_change().await;
    }

    tracing::trace!(key = subscription.key(), "Sync listener stopped");
}
