//! Synchronous change-notification channels
//!
//! Callbacks run on the thread that raises the event. Marshaling to a
//! particular thread is the subscriber's job.

use ahash::AHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle returned by `subscribe`, used to unsubscribe later
///
/// Ids are unique across every channel in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A set of callbacks for one event kind
pub struct Subscribers<T> {
    callbacks: Mutex<AHashMap<SubscriptionId, Callback<T>>>,
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(AHashMap::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.lock().insert(id, Arc::new(callback));
        id
    }

    /// Returns false if `id` was not subscribed here
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Invoke every callback with `event`. Returns how many ran.
    ///
    /// The lock is released before any callback runs, so callbacks may
    /// subscribe or unsubscribe re-entrantly.
    pub fn raise(&self, event: &T) -> usize {
        let snapshot: Vec<Callback<T>> = self.lock().values().cloned().collect();
        for callback in &snapshot {
            callback(event);
        }
        snapshot.len()
    }

    // Callbacks never run under the lock, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, AHashMap<SubscriptionId, Callback<T>>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_raise_reaches_every_subscriber() {
        let subs: Subscribers<u32> = Subscribers::new();
        let total = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let total = total.clone();
            subs.subscribe(move |v| {
                total.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }
        assert_eq!(subs.raise(&2), 3);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_unsubscribe() {
        let subs: Subscribers<u32> = Subscribers::new();
        let id = subs.subscribe(|_| {});
        assert!(subs.unsubscribe(id));
        assert!(!subs.unsubscribe(id));
        assert_eq!(subs.raise(&1), 0);
        assert!(subs.is_empty());
    }

    #[test]
    fn test_callback_can_unsubscribe_itself() {
        let subs: Arc<Subscribers<u32>> = Arc::new(Subscribers::new());
        let slot = Arc::new(Mutex::new(None));
        let id = {
            let this = subs.clone();
            let slot = slot.clone();
            subs.subscribe(move |_| {
                if let Some(id) = slot.lock().unwrap().take() {
                    this.unsubscribe(id);
                }
            })
        };
        *slot.lock().unwrap() = Some(id);
        subs.raise(&0);
        assert_eq!(subs.len(), 0);
    }

    #[test]
    fn test_ids_are_distinct() {
        let a: Subscribers<()> = Subscribers::new();
        let b: Subscribers<()> = Subscribers::new();
        let ia = a.subscribe(|_| {});
        let ib = b.subscribe(|_| {});
        assert_ne!(ia, ib);
        assert!(!a.unsubscribe(ib));
    }
}
