//! Per-invocation cancellation source

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::types::InvocationId;

/// Cancellation source owned by exactly one invocation
///
/// Clones share state. Once disposed, `cancel` is silently ignored, so a
/// group cancel racing an invocation's own cleanup is harmless.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    id: InvocationId,
    token: CancellationToken,
    disposed: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    /// Create a handle that is also cancelled whenever `parent` is
    pub fn linked(parent: &CancellationToken) -> Self {
        Self::from_token(parent.child_token())
    }

    fn from_token(token: CancellationToken) -> Self {
        Self {
            id: InvocationId::new(),
            token,
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Request cancellation. No-op once the handle has been disposed.
    pub fn cancel(&self) {
        if self.is_disposed() {
            return;
        }
        self.token.cancel();
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Token view of this handle, for passing to code that only knows tokio-util
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Mark the handle as finished. Returns true only for the call that
    /// actually disposed it.
    pub fn dispose(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for CancellationHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CancellationHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_observed_by_clones() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancellation_requested());
        handle.cancel();
        assert!(clone.is_cancellation_requested());
        assert_eq!(handle, clone);
    }

    #[test]
    fn test_linked_follows_parent() {
        let parent = CancellationToken::new();
        let handle = CancellationHandle::linked(&parent);
        parent.cancel();
        assert!(handle.is_cancellation_requested());
    }

    #[test]
    fn test_linked_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let handle = CancellationHandle::linked(&parent);
        handle.cancel();
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_cancel_after_dispose_is_ignored() {
        let handle = CancellationHandle::new();
        assert!(handle.dispose());
        handle.cancel();
        assert!(!handle.is_cancellation_requested());
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let handle = CancellationHandle::new();
        handle.cancel();
        assert!(handle.dispose());
        assert!(!handle.dispose());
        assert!(handle.is_disposed());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let handle = CancellationHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        handle.cancel();
        task.await.unwrap();
    }
}
