//! Live set of in-flight invocations
//!
//! The map and the counter are kept separately: the map answers "which
//! handles are live" for group cancellation, the counter decides which
//! invocation observed a 0->1 or 1->0 transition.

use ahash::AHashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread::ThreadId;
use std::time::Instant;

use crate::cancel::CancellationHandle;
use crate::core::types::InvocationId;

struct Registration {
    handle: CancellationHandle,
    thread: ThreadId,
    started_at: Instant,
}

/// Diagnostic view of one live invocation
#[derive(Debug, Clone)]
pub struct InvocationInfo {
    pub id: InvocationId,
    pub thread: ThreadId,
    pub started_at: Instant,
    pub cancellation_requested: bool,
}

#[derive(Default)]
pub struct InvocationRegistry {
    entries: Mutex<AHashMap<InvocationId, Registration>>,
    count: AtomicUsize,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handle` and bump the counter. Returns the counter value
    /// after the increment, so exactly one caller ever sees 1 per transition.
    ///
    /// Returns `None` (and leaves the counter alone) if the handle was
    /// already registered.
    pub fn register(&self, handle: &CancellationHandle) -> Option<usize> {
        let registration = Registration {
            handle: handle.clone(),
            thread: std::thread::current().id(),
            started_at: Instant::now(),
        };
        match self.lock().entry(handle.id()) {
            Entry::Occupied(_) => {
                debug_assert!(false, "invocation {} registered twice", handle.id());
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(registration);
            }
        }
        Some(self.count.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Remove `id` and drop the counter. Returns the counter value after
    /// the decrement, or `None` if `id` was never registered.
    pub fn unregister(&self, id: InvocationId) -> Option<usize> {
        let removed = self.lock().remove(&id);
        if removed.is_none() {
            debug_assert!(false, "invocation {} unregistered without register", id);
            return None;
        }
        Some(self.count.fetch_sub(1, Ordering::AcqRel) - 1)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn contains(&self, id: InvocationId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Handles live at the moment of the call. The lock is not held while
    /// the caller works through the result.
    pub fn snapshot(&self) -> Vec<CancellationHandle> {
        self.lock().values().map(|r| r.handle.clone()).collect()
    }

    pub fn infos(&self) -> Vec<InvocationInfo> {
        self.lock()
            .iter()
            .map(|(id, r)| InvocationInfo {
                id: *id,
                thread: r.thread,
                started_at: r.started_at,
                cancellation_requested: r.handle.is_cancellation_requested(),
            })
            .collect()
    }

    // No user code runs under this lock, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, AHashMap<InvocationId, Registration>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for InvocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationRegistry")
            .field("count", &self.count())
            .finish()
    }
}
