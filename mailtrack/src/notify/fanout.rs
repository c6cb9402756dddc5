//! Best-effort fan-out of open events to connected observers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::email::OpenEvent;

/// Identifier handed out to each registered observer.
pub type ObserverId = u64;

/// Receiving half of an observer registration.
pub struct Subscription {
    pub id: ObserverId,
    pub receiver: mpsc::Receiver<OpenEvent>,
}

/// Per-broadcast delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Observers the event was queued for.
    pub delivered: usize,
    /// Observers whose queue was full; they are disconnected.
    pub lagging: usize,
    /// Observers found disconnected and removed.
    pub pruned: usize,
}

/// Registry of connected observers.
///
/// Cheap to clone; all clones share one registry. Each observer gets a
/// bounded queue. Sends never wait: an observer whose queue is full is
/// lagging and gets dropped from the registry, which closes its connection,
/// and a closed one is dropped as well. Every observer still registered has
/// therefore received every event since it registered, in the order
/// broadcasts were issued (they run under the registry lock).
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    observers: Mutex<HashMap<ObserverId, mpsc::Sender<OpenEvent>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Notifier {
    /// Create a notifier whose observers buffer up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                observers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Add an observer. It receives only events broadcast from now on.
    pub async fn register(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.buffer);

        let mut observers = self.inner.observers.lock().await;
        observers.insert(id, sender);

        info!(
            observer_id = id,
            observer_count = observers.len(),
            "observer_registered"
        );

        Subscription { id, receiver }
    }

    /// Remove an observer. Returns whether it was still registered.
    pub async fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.lock().await;
        let removed = observers.remove(&id).is_some();

        if removed {
            info!(
                observer_id = id,
                observer_count = observers.len(),
                "observer_unregistered"
            );
        }

        removed
    }

    /// Push an event to every registered observer, dropping lagging ones.
    pub async fn broadcast(&self, event: &OpenEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut observers = self.inner.observers.lock().await;
        let mut dropped = Vec::new();

        for (id, sender) in observers.iter() {
            match sender.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        observer_id = *id,
                        tracking_id = %event.tracking_id,
                        "observer_lagging_disconnected"
                    );
                    dropped.push(*id);
                    report.lagging += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(observer_id = *id, "observer_channel_closed");
                    dropped.push(*id);
                    report.pruned += 1;
                }
            }
        }

        for id in &dropped {
            observers.remove(id);
        }

        info!(
            tracking_id = %event.tracking_id,
            status = %event.status,
            delivered = report.delivered,
            lagging = report.lagging,
            pruned = report.pruned,
            "open_event_broadcast"
        );

        report
    }

    /// Number of registered observers.
    pub async fn observer_count(&self) -> usize {
        self.inner.observers.lock().await.len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::TrackingId;

    fn event(id: &str) -> OpenEvent {
        OpenEvent::opened(TrackingId::parse(id).unwrap())
    }

    #[tokio::test]
    async fn test_broadcast_with_no_observers() {
        let notifier = Notifier::new(4);
        let report = notifier.broadcast(&event("E1")).await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_every_observer_receives_in_order() {
        let notifier = Notifier::new(8);
        let mut first = notifier.register().await;
        let mut second = notifier.register().await;

        notifier.broadcast(&event("E1")).await;
        notifier.broadcast(&event("E2")).await;

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.receiver.recv().await, Some(event("E1")));
            assert_eq!(sub.receiver.recv().await, Some(event("E2")));
        }
    }

    #[tokio::test]
    async fn test_late_observer_misses_earlier_events() {
        let notifier = Notifier::new(8);
        notifier.broadcast(&event("E1")).await;

        let mut late = notifier.register().await;
        notifier.broadcast(&event("E2")).await;

        assert_eq!(late.receiver.recv().await, Some(event("E2")));
        assert!(late.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lagging_observer_is_dropped_without_blocking_others() {
        let notifier = Notifier::new(1);
        let mut stalled = notifier.register().await;
        let mut healthy = notifier.register().await;

        notifier.broadcast(&event("E1")).await;
        healthy.receiver.recv().await;

        let report = notifier.broadcast(&event("E2")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.lagging, 1);
        assert_eq!(healthy.receiver.recv().await, Some(event("E2")));
        assert_eq!(notifier.observer_count().await, 1);

        // The stalled observer keeps what it had queued, then its stream ends.
        assert_eq!(stalled.receiver.recv().await, Some(event("E1")));
        assert_eq!(stalled.receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_registered_observers_never_see_gaps() {
        let notifier = Notifier::new(2);
        let mut idle = notifier.register().await;

        for n in 0..5 {
            notifier.broadcast(&event(&format!("E{}", n))).await;
        }

        assert_eq!(notifier.observer_count().await, 0);
        assert_eq!(idle.receiver.recv().await, Some(event("E0")));
        assert_eq!(idle.receiver.recv().await, Some(event("E1")));
        assert_eq!(idle.receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_observer_is_pruned() {
        let notifier = Notifier::new(4);
        let dropped = notifier.register().await;
        let mut live = notifier.register().await;
        drop(dropped);

        let report = notifier.broadcast(&event("E1")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, 1);
        assert_eq!(notifier.observer_count().await, 1);
        assert_eq!(live.receiver.recv().await, Some(event("E1")));
    }

    #[tokio::test]
    async fn test_unregister() {
        let notifier = Notifier::new(4);
        let sub = notifier.register().await;

        assert!(notifier.unregister(sub.id).await);
        assert!(!notifier.unregister(sub.id).await);
        assert_eq!(notifier.observer_count().await, 0);
    }
}
