//! Observer registries for session notifications.
//!
//! Observers are invoked synchronously, in registration order, after the
//! session table lock has been released. A panicking observer is logged and
//! skipped; the remaining observers still run. Every event is also published on
//! a broadcast channel for consumers that prefer a stream.
//!
//! ```rust
//! use prepper_client::events::ObserverRegistry;
//!
//! # tokio_test::block_on(async {
//! let registry = ObserverRegistry::<String>::new(16);
//! let mut stream = registry.subscribe();
//! registry.register_fn(|event: &String| println!("observed {event}"));
//!
//! registry.notify("analysis completed".to_string());
//! assert_eq!(stream.recv().await.unwrap(), "analysis completed");
//! # });
//! ```

use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

pub trait SessionObserver<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> SessionObserver<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// Returned by [`ObserverRegistry::register`]; pass to `remove` to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

type ObserverList<E> = Vec<(ObserverHandle, Arc<dyn SessionObserver<E>>)>;

pub struct ObserverRegistry<E> {
    observers: RwLock<ObserverList<E>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> ObserverRegistry<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    pub fn register(&self, observer: Arc<dyn SessionObserver<E>>) -> ObserverHandle {
        let handle = ObserverHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((handle, observer));
        handle
    }

    pub fn register_fn<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(Arc::new(observer))
    }

    /// Returns whether the handle was registered.
    pub fn remove(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != handle);
        observers.len() != before
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, event: E) {
        let snapshot: Vec<_> = self
            .observers
            .read()
            .iter()
            .map(|(handle, observer)| (*handle, Arc::clone(observer)))
            .collect();

        for (handle, observer) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer.on_event(&event))).is_err() {
                error!(observer = handle.0, "Session observer panicked; continuing");
            }
        }

        // No receivers is fine
        let _ = self.sender.send(event);
    }
}

impl<E> fmt::Debug for ObserverRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.observers.read().len())
            .field("stream_subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_panicking_observer_is_isolated() {
        let registry = ObserverRegistry::<u32>::new(8);
        let seen = Arc::new(AtomicUsize::new(0));

        registry.register_fn(|_: &u32| panic!("observer bug"));
        let counter = Arc::clone(&seen);
        registry.register_fn(move |value: &u32| {
            counter.fetch_add(*value as usize, Ordering::SeqCst);
        });

        registry.notify(3);
        registry.notify(4);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_remove_stops_delivery() {
        let registry = ObserverRegistry::<u32>::new(8);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handle = registry.register_fn(move |_: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(1);
        assert!(registry.remove(handle));
        assert!(!registry.remove(handle));
        registry.notify(1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let registry = ObserverRegistry::<&'static str>::new(8);
        let mut receiver = registry.subscribe();
        registry.notify("completed");
        assert_eq!(receiver.recv().await.unwrap(), "completed");
    }
}
