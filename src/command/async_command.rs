//! Multi-execution async command
//!
//! One logical command, any number of concurrent invocations. Every
//! in-flight invocation owns a [`CancellationHandle`] registered with the
//! command, so the whole group can be cancelled at once with
//! [`AsyncCommand::cancel`] and re-armed with [`AsyncCommand::reset_cancel`].
//!
//! Invocation lifecycle:
//! created -> registered -> running -> unregistered -> finished
//!
//! Registration happens synchronously inside `execute_async`/`execute`,
//! before the returned future is first polled. Unregistration is done by a
//! drop guard, so it runs exactly once whether the work succeeds, fails,
//! is cancelled, panics or has its future dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cancel::CancellationHandle;
use crate::command::context::{self, InvocationContext};
use crate::command::registry::{InvocationInfo, InvocationRegistry};
use crate::core::config::CommandConfig;
use crate::core::error::{CommandError, Result};
use crate::core::types::{CancellationState, CommandId, PropertyName};
use crate::notify::{Subscribers, SubscriptionId};

/// Boxed future returned by a work function
pub type WorkFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

type WorkFn<P> = dyn Fn(P, InvocationContext) -> WorkFuture + Send + Sync;
type CanExecuteFn<P> = dyn Fn(&P) -> bool + Send + Sync;

struct Inner<P> {
    id: CommandId,
    name: Arc<str>,
    work: Box<WorkFn<P>>,
    can_execute: Box<CanExecuteFn<P>>,
    // Only gates the fast reject in can_execute; Relaxed is enough.
    allow_concurrent_execution: AtomicBool,
    cancellation_state: AtomicU8,
    registry: InvocationRegistry,
    property_changed: Subscribers<PropertyName>,
    failed: Subscribers<CommandError>,
    runtime: Option<Handle>,
}

impl<P> Inner<P> {
    fn cancellation_state(&self) -> CancellationState {
        CancellationState::from_u8(self.cancellation_state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: CancellationState, to: CancellationState) -> bool {
        self.cancellation_state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn raise(&self, property: PropertyName) {
        self.property_changed.raise(&property);
    }

    fn executing_changed(&self, executing: bool) {
        tracing::debug!("{}: is_executing -> {}", self.name, executing);
        self.raise(PropertyName::IsExecuting);
        self.raise(PropertyName::CanExecute);
    }

    fn report_failure(&self, error: &CommandError) -> usize {
        self.failed.raise(error)
    }
}

/// Keeps one invocation registered for as long as it is alive
struct InvocationGuard<P> {
    inner: Arc<Inner<P>>,
    handle: CancellationHandle,
}

impl<P> InvocationGuard<P> {
    fn register(inner: Arc<Inner<P>>, handle: CancellationHandle) -> Self {
        if inner.registry.register(&handle) == Some(1) {
            inner.executing_changed(true);
        }
        Self { inner, handle }
    }
}

impl<P> Drop for InvocationGuard<P> {
    fn drop(&mut self) {
        if self.inner.registry.unregister(self.handle.id()) == Some(0) {
            self.inner.executing_changed(false);
        }
        let first = self.handle.dispose();
        debug_assert!(first, "invocation {} disposed twice", self.handle.id());
    }
}

/// An invocation that passed admission and is registered, but whose work
/// function has not been called yet
struct Started<P> {
    guard: InvocationGuard<P>,
    parameter: P,
}

impl<P> Started<P> {
    async fn run(self) -> Result<()> {
        let Started { guard, parameter } = self;
        let inner = guard.inner.clone();
        let handle = guard.handle.clone();

        let ctx = InvocationContext::new(handle.clone(), inner.name.clone());
        let work = &inner.work;
        let result = context::scoped(inner.id, handle, move || work(parameter, ctx)).await;

        if let Err(error) = &result {
            if !error.is_cancelled() {
                tracing::debug!("{}: invocation failed: {}", inner.name, error);
                inner.report_failure(error);
            }
        }

        drop(guard);
        result
    }
}

/// A command that may be executing many times at once
///
/// Cloning is cheap and every clone refers to the same command.
pub struct AsyncCommand<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for AsyncCommand<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Send + 'static> AsyncCommand<P> {
    /// Command with default configuration and no extra admission predicate
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: Fn(P, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self::builder(work).build()
    }

    pub fn builder<F, Fut>(work: F) -> AsyncCommandBuilder<P>
    where
        F: Fn(P, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        AsyncCommandBuilder::new(work)
    }

    pub fn id(&self) -> CommandId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn allow_concurrent_execution(&self) -> bool {
        self.inner.allow_concurrent_execution.load(Ordering::Relaxed)
    }

    /// Changing the flag raises `CanExecute`
    pub fn set_allow_concurrent_execution(&self, allow: bool) {
        let previous = self
            .inner
            .allow_concurrent_execution
            .swap(allow, Ordering::Relaxed);
        if previous != allow {
            self.inner.raise(PropertyName::CanExecute);
        }
    }

    /// Whether an invocation with `parameter` would be admitted right now
    pub fn can_execute(&self, parameter: &P) -> bool {
        if !self.allow_concurrent_execution() && self.executing_count() != 0 {
            return false;
        }
        (self.inner.can_execute)(parameter)
    }

    /// Announce that inputs to the admission predicate changed
    pub fn raise_can_execute_changed(&self) {
        self.inner.raise(PropertyName::CanExecute);
    }

    pub fn is_executing(&self) -> bool {
        self.executing_count() != 0
    }

    pub fn executing_count(&self) -> usize {
        self.inner.registry.count()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.inner.cancellation_state() != CancellationState::NotCanceled
    }

    pub fn cancellation_state(&self) -> CancellationState {
        self.inner.cancellation_state()
    }

    /// Snapshot of the live invocations, for diagnostics
    pub fn executing_invocations(&self) -> Vec<InvocationInfo> {
        self.inner.registry.infos()
    }

    /// Handle of the invocation of this command whose work is currently
    /// running on the calling task, if any
    pub fn current_cancellation_handle(&self) -> Option<CancellationHandle> {
        context::current(self.inner.id)
    }

    /// Start an invocation and return a future for its outcome
    ///
    /// Admission and registration happen before this returns. A rejected
    /// invocation resolves to `Ok(())` without running the work function.
    /// An invocation that is cancelled before its work starts resolves to
    /// `Err(CommandError::Cancelled)`. Work failures are reported to
    /// failure subscribers and then returned unchanged.
    pub fn execute_async(
        &self,
        parameter: P,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let started = self.begin(parameter, None);
        async move {
            match started? {
                Some(started) => started.run().await,
                None => Ok(()),
            }
        }
    }

    /// Like [`execute_async`](Self::execute_async), additionally cancelled
    /// when `external` is
    pub fn execute_async_with(
        &self,
        parameter: P,
        external: &CancellationToken,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let started = self.begin(parameter, Some(external));
        async move {
            match started? {
                Some(started) => started.run().await,
                None => Ok(()),
            }
        }
    }

    /// Fire-and-forget entry point for synchronous callers
    ///
    /// Nothing escapes to the caller: cancellation is dropped silently and
    /// failures are only visible through failure subscribers (or the log,
    /// when there are none). A panicking work function is logged at `error`.
    /// The join handle may be ignored; it only lets a host wait for the
    /// spawned invocation.
    ///
    /// Returns `None` when the invocation is rejected, or when there is no
    /// runtime to run it on.
    pub fn execute(&self, parameter: P) -> Option<JoinHandle<()>> {
        if !self.can_execute(&parameter) {
            tracing::debug!("{}: execute rejected", self.inner.name);
            return None;
        }

        let runtime = match self.inner.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => runtime,
            None => {
                tracing::error!("{}: execute called outside a tokio runtime", self.inner.name);
                self.inner.report_failure(&CommandError::NoRuntime);
                return None;
            }
        };

        let inner = self.inner.clone();
        let invocation = runtime.spawn(self.execute_async(parameter));
        Some(runtime.spawn(async move {
            match invocation.await {
                Ok(Ok(())) => {}
                Ok(Err(CommandError::Cancelled)) => {
                    tracing::debug!("{}: fire-and-forget invocation cancelled", inner.name);
                }
                Ok(Err(error)) => {
                    if inner.failed.is_empty() {
                        tracing::warn!("{}: unobserved failure in execute: {}", inner.name, error);
                    }
                }
                Err(join_error) if join_error.is_panic() => {
                    tracing::error!("{}: invocation panicked in execute", inner.name);
                }
                Err(join_error) => {
                    tracing::debug!("{}: fire-and-forget invocation aborted: {}", inner.name, join_error);
                }
            }
        }))
    }

    /// Request cancellation of every in-flight invocation
    ///
    /// Only the first call per cancellation epoch does anything. Returns
    /// once all handles visible at that moment have been signalled, not
    /// once their invocations have finished; follow with [`wait`](Self::wait)
    /// for that.
    pub fn cancel(&self) {
        if !self
            .inner
            .transition(CancellationState::NotCanceled, CancellationState::Notifying)
        {
            return;
        }

        let handles = self.inner.registry.snapshot();
        for handle in &handles {
            handle.cancel();
        }
        tracing::info!(
            "{}: cancellation requested, signalled {} invocation(s)",
            self.inner.name,
            handles.len()
        );
        self.inner.raise(PropertyName::IsCancellationRequested);
    }

    /// Clear a group cancellation so new invocations start uncancelled
    ///
    /// Handles that were already cancelled stay cancelled.
    pub fn reset_cancel(&self) {
        if self
            .inner
            .transition(CancellationState::Notifying, CancellationState::NotCanceled)
        {
            tracing::info!("{}: cancellation reset", self.inner.name);
            self.inner.raise(PropertyName::IsCancellationRequested);
        }
    }

    /// Resolve once no invocation is in flight
    ///
    /// With `cancel`, gives up with `Err(CommandError::Cancelled)` when the
    /// token fires first.
    pub async fn wait(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        if !self.is_executing() {
            return Ok(());
        }

        // notify_one stores a permit, so a transition between the check
        // below and the await is not lost.
        let notify = Arc::new(Notify::new());
        let id = {
            let notify = notify.clone();
            self.inner.property_changed.subscribe(move |property| {
                if *property == PropertyName::IsExecuting {
                    notify.notify_one();
                }
            })
        };
        let _subscription = Unsubscribe {
            subscribers: &self.inner.property_changed,
            id,
        };

        loop {
            if !self.is_executing() {
                return Ok(());
            }
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = notify.notified() => {}
                        _ = token.cancelled() => return Err(CommandError::Cancelled),
                    }
                }
                None => notify.notified().await,
            }
        }
    }

    pub async fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.wait(None))
            .await
            .map_err(|_| CommandError::TimedOut(timeout))?
    }

    /// [`cancel`](Self::cancel) followed by [`wait`](Self::wait)
    pub async fn cancel_and_wait(&self) -> Result<()> {
        self.cancel();
        self.wait(None).await
    }

    pub fn subscribe_property_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(PropertyName) + Send + Sync + 'static,
    {
        self.inner
            .property_changed
            .subscribe(move |property| callback(*property))
    }

    /// Called once per work failure; never for cancellation
    pub fn subscribe_failed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&CommandError) + Send + Sync + 'static,
    {
        self.inner.failed.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.property_changed.unsubscribe(id) || self.inner.failed.unsubscribe(id)
    }

    // Admission, handle creation and registration. Ok(None) means rejected.
    fn begin(
        &self,
        parameter: P,
        external: Option<&CancellationToken>,
    ) -> Result<Option<Started<P>>> {
        if !self.can_execute(&parameter) {
            tracing::debug!("{}: invocation rejected", self.inner.name);
            return Ok(None);
        }

        let handle = match external {
            Some(token) => CancellationHandle::linked(token),
            None => CancellationHandle::new(),
        };
        if self.is_cancellation_requested() {
            handle.cancel();
        }
        if handle.is_cancellation_requested() {
            tracing::debug!("{}: invocation {} born cancelled", self.inner.name, handle.id());
            handle.dispose();
            return Err(CommandError::Cancelled);
        }

        let guard = InvocationGuard::register(self.inner.clone(), handle.clone());

        // A cancel() that took its snapshot before we registered is caught here.
        if self.is_cancellation_requested() {
            handle.cancel();
        }
        if handle.is_cancellation_requested() {
            drop(guard);
            return Err(CommandError::Cancelled);
        }

        Ok(Some(Started { guard, parameter }))
    }
}

impl<P> std::fmt::Debug for AsyncCommand<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCommand")
            .field("name", &self.inner.name)
            .field("executing_count", &self.inner.registry.count())
            .field("cancellation_state", &self.inner.cancellation_state())
            .finish()
    }
}

struct Unsubscribe<'a> {
    subscribers: &'a Subscribers<PropertyName>,
    id: SubscriptionId,
}

impl Drop for Unsubscribe<'_> {
    fn drop(&mut self) {
        self.subscribers.unsubscribe(self.id);
    }
}

/// Builder for [`AsyncCommand`]
pub struct AsyncCommandBuilder<P> {
    work: Box<WorkFn<P>>,
    can_execute: Box<CanExecuteFn<P>>,
    config: CommandConfig,
    runtime: Option<Handle>,
}

impl<P: Send + 'static> AsyncCommandBuilder<P> {
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: Fn(P, InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            work: Box::new(move |parameter: P, ctx: InvocationContext| -> WorkFuture {
                Box::pin(work(parameter, ctx))
            }),
            can_execute: Box::new(|_: &P| true),
            config: CommandConfig::default(),
            runtime: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn config(mut self, config: CommandConfig) -> Self {
        self.config = config;
        self
    }

    pub fn allow_concurrent_execution(mut self, allow: bool) -> Self {
        self.config.allow_concurrent_execution = allow;
        self
    }

    /// Extra admission predicate consulted by `can_execute`
    pub fn can_execute<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&P) -> bool + Send + Sync + 'static,
    {
        self.can_execute = Box::new(predicate);
        self
    }

    /// Runtime used by `execute` when called from a thread outside any runtime
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> AsyncCommand<P> {
        AsyncCommand {
            inner: Arc::new(Inner {
                id: CommandId::new(),
                name: Arc::from(self.config.name.as_str()),
                work: self.work,
                can_execute: self.can_execute,
                allow_concurrent_execution: AtomicBool::new(self.config.allow_concurrent_execution),
                cancellation_state: AtomicU8::new(CancellationState::NotCanceled as u8),
                registry: InvocationRegistry::new(),
                property_changed: Subscribers::new(),
                failed: Subscribers::new(),
                runtime: self.runtime,
            }),
        }
    }
}
