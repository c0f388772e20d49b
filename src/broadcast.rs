//! Live subscriber registry and snapshot fan-out
//!
//! Every connected subscriber owns a bounded channel. The [`Broadcaster`]
//! keeps the sending halves and pushes each snapshot into all of them:
//!
//! ```text
//!                     ┌──────────────┐
//!   push(snapshot) ──►│ Broadcaster  │── send_timeout ──► subscriber 1 ──► socket
//!                     │ (registry)   │── send_timeout ──► subscriber 2 ──► socket
//!                     └──────────────┘── send_timeout ──► subscriber N ──► socket
//! ```
//!
//! ## Locking
//!
//! The registry mutex is held only to mutate membership or to clone the list
//! of senders. Deliveries run afterwards, concurrently, each bounded by the
//! push timeout, so a subscriber that stops draining its channel cannot stall
//! the others. A subscriber whose channel is closed or stays full past the
//! timeout is removed before `push` returns.
//!
//! Pruning is eventual: a push that cloned a sender before another push pruned
//! it may still deliver into that subscriber's channel.
//!
//! Unlike `tokio::sync::broadcast`, a slow subscriber is never silently
//! lagged: it either sees every snapshot or is dropped from the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, trace, warn};

use crate::Snapshot;

/// Pushes a subscriber may have queued before it counts as stalled
const SUBSCRIBER_BUFFER: usize = 32;

/// Opaque registry id, only meaningful while the subscription lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receiving side of a registration
///
/// Pass it back to [`Broadcaster::unsubscribe`] when the connection ends.
/// Once the broadcaster prunes it, `recv` returns `None`.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Snapshot>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next pushed snapshot, `None` once this subscriber was removed
    pub async fn recv(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }
}

/// Per-push delivery summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    pub removed: Vec<SubscriberId>,
}

#[derive(Debug, Default)]
struct Registry {
    subscribers: HashMap<SubscriberId, mpsc::Sender<Snapshot>>,
}

#[derive(Debug)]
struct Inner {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    push_timeout: Duration,
}

/// Cheaply cloneable handle to the shared subscriber registry
#[derive(Debug, Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    pub fn new(push_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                next_id: AtomicU64::new(0),
                push_timeout,
            }),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // The registry is a plain map; a panic elsewhere cannot leave it half-updated.
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        let count = {
            let mut registry = self.registry();
            registry.subscribers.insert(id, tx);
            registry.subscribers.len()
        };

        debug!("subscriber {id} registered ({count} active)");
        Subscription { id, rx }
    }

    /// Remove the subscription. Dropping its receiver makes any in-flight
    /// push to it fail instead of being delivered.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let Subscription { id, rx } = subscription;
        let removed = self.registry().subscribers.remove(&id).is_some();
        drop(rx);

        if removed {
            debug!("subscriber {id} unregistered");
        } else {
            trace!("subscriber {id} was already removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().subscribers.len()
    }

    /// Deliver `snapshot` to every current subscriber.
    pub async fn push(&self, snapshot: &Snapshot) -> PushReport {
        let targets: Vec<(SubscriberId, mpsc::Sender<Snapshot>)> = self
            .registry()
            .subscribers
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        if targets.is_empty() {
            trace!("no subscribers for device {}", snapshot.id);
            return PushReport::default();
        }

        let timeout = self.inner.push_timeout;
        let deliveries = targets.into_iter().map(|(id, tx)| {
            let snapshot = snapshot.clone();
            async move {
                match tx.send_timeout(snapshot, timeout).await {
                    Ok(()) => (id, true),
                    Err(SendTimeoutError::Closed(_)) => {
                        debug!("subscriber {id} is gone");
                        (id, false)
                    }
                    Err(SendTimeoutError::Timeout(_)) => {
                        warn!("subscriber {id} stalled for {timeout:?}, dropping it");
                        (id, false)
                    }
                }
            }
        });

        let results = join_all(deliveries).await;

        let removed: Vec<SubscriberId> = results
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(id, _)| *id)
            .collect();

        if !removed.is_empty() {
            let mut registry = self.registry();
            for id in &removed {
                registry.subscribers.remove(id);
            }
        }

        let report = PushReport {
            delivered: results.len() - removed.len(),
            removed,
        };
        trace!(
            "pushed device {} to {} subscribers, removed {}",
            snapshot.id,
            report.delivered,
            report.removed.len()
        );
        report
    }
}
