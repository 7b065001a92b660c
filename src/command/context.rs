//! Per-invocation context
//!
//! The work function always receives its [`InvocationContext`] directly.
//! The ambient lookup behind `AsyncCommand::current_cancellation_handle`
//! is a tokio task-local, so it follows the invocation across `.await`
//! points and worker threads but is invisible to sibling invocations.
//! Tasks spawned from inside a work function do not inherit it; pass the
//! context along instead.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cancel::CancellationHandle;
use crate::core::error::{CommandError, Result};
use crate::core::types::{CommandId, InvocationId};

/// What a work function knows about the invocation running it
#[derive(Debug, Clone)]
pub struct InvocationContext {
    handle: CancellationHandle,
    command: Arc<str>,
}

impl InvocationContext {
    pub(crate) fn new(handle: CancellationHandle, command: Arc<str>) -> Self {
        Self { handle, command }
    }

    pub fn id(&self) -> InvocationId {
        self.handle.id()
    }

    pub fn handle(&self) -> &CancellationHandle {
        &self.handle
    }

    pub fn command_name(&self) -> &str {
        &self.command
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.handle.is_cancellation_requested()
    }

    /// `Err(CommandError::Cancelled)` once cancellation was requested
    ///
    /// Intended for polling loops: `ctx.check_cancelled()?;`
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancellation_requested() {
            Err(CommandError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn cancelled(&self) {
        self.handle.cancelled().await
    }

    pub fn token(&self) -> CancellationToken {
        self.handle.token()
    }
}

// Innermost entry last; one entry per command currently running on this flow.
#[derive(Clone, Default)]
struct FlowScope {
    entries: Vec<(CommandId, CancellationHandle)>,
}

tokio::task_local! {
    static CURRENT: FlowScope;
}

/// Build a future with `make` and run it, with `handle` visible as the
/// current invocation of `command` both while `make` runs and while the
/// future is polled
pub(crate) async fn scoped<M, F>(command: CommandId, handle: CancellationHandle, make: M) -> F::Output
where
    M: FnOnce() -> F,
    F: Future,
{
    let mut scope = CURRENT.try_with(FlowScope::clone).unwrap_or_default();
    scope.entries.push((command, handle));
    CURRENT.scope(scope, async move { make().await }).await
}

/// Handle of the innermost running invocation of `command` on this flow
pub(crate) fn current(command: CommandId) -> Option<CancellationHandle> {
    CURRENT
        .try_with(|scope| {
            scope
                .entries
                .iter()
                .rev()
                .find(|(id, _)| *id == command)
                .map(|(_, handle)| handle.clone())
        })
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_current_is_none_outside_scope() {
        assert!(current(CommandId::new()).is_none());
    }

    #[tokio::test]
    async fn test_scoped_handle_survives_await() {
        let command = CommandId::new();
        let handle = CancellationHandle::new();
        let expected = handle.clone();

        let seen = scoped(command, handle, move || async move {
            tokio::task::yield_now().await;
            current(command)
        })
        .await;

        assert_eq!(seen, Some(expected));
        assert!(current(command).is_none());
    }

    #[tokio::test]
    async fn test_nested_commands_see_their_own_handles() {
        let outer = CommandId::new();
        let inner = CommandId::new();
        let outer_handle = CancellationHandle::new();
        let inner_handle = CancellationHandle::new();
        let (oh, ih) = (outer_handle.clone(), inner_handle.clone());

        scoped(outer, outer_handle, move || async move {
            let seen_from_inner = oh.clone();
            scoped(inner, inner_handle, move || async move {
                assert_eq!(current(outer), Some(seen_from_inner));
                assert_eq!(current(inner), Some(ih));
            })
            .await;
            assert_eq!(current(outer), Some(oh));
            assert!(current(inner).is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn test_handle_visible_while_building_future() {
        let command = CommandId::new();
        let handle = CancellationHandle::new();
        let expected = handle.clone();

        let seen = scoped(command, handle, move || {
            let before_first_await = current(command);
            async move { before_first_await }
        })
        .await;

        assert_eq!(seen, Some(expected));
    }

    #[test]
    fn test_check_cancelled() {
        let ctx = InvocationContext::new(CancellationHandle::new(), Arc::from("test"));
        assert!(ctx.check_cancelled().is_ok());
        ctx.handle().cancel();
        assert!(matches!(ctx.check_cancelled(), Err(CommandError::Cancelled)));
        assert_eq!(ctx.command_name(), "test");
    }
}
