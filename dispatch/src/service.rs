//! The dispatcher façade.
//!
//! One [`Dispatcher`] is built by the process's composition root, on the
//! thread that owns the thread-affine state (the "affinity" thread,
//! typically the main/UI thread), and then handed to every other thread as
//! a cheap clone. It never changes its affinity binding and has no
//! shutdown: the background worker and the thread binding live for the
//! process lifetime.

use std::backtrace::Backtrace;
use std::env;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::affinity::{AffinityQueue, DrainStatus};
use crate::background::{self, BackgroundQueue};
use crate::envelope::{Completion, Envelope};
use crate::errors::DispatchError;
use crate::hooks::{DispatchOrigin, EventPump, FailureSink, IdleWake, NoopPump, TracingSink};

/// Environment toggle for caller stack capture.
///
/// When set (to any non-empty value) at service construction, every
/// dispatched envelope records the dispatching call site's backtrace so
/// asynchronous failures can be traced back to their origin. Off by default;
/// capture is paid on every dispatch.
pub const DISPATCH_DEBUG_ENV: &str = "SPINDLE_DISPATCH_DEBUG";

/// Cross-thread dispatch onto the affinity thread and a shared background
/// worker.
///
/// Delivery modes:
/// - [`dispatch`](Self::dispatch): fire-and-forget onto the affinity thread.
/// - [`dispatch_sync`](Self::dispatch_sync): block until the callback ran on
///   the affinity thread; runs inline when already there.
/// - [`dispatch_background`](Self::dispatch_background): fire-and-forget
///   onto the single shared worker thread, serialized behind earlier work.
/// - [`dispatch_detached`](Self::dispatch_detached): one fresh thread per
///   call, for work that must not wait behind the shared worker.
///
/// Ordering is FIFO within each queue, with no ordering contract across
/// queues. Queued work cannot be cancelled or reprioritized.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Shared>,
}

struct Shared {
    affinity_thread: ThreadId,
    affinity_queue: AffinityQueue,
    background_queue: Arc<BackgroundQueue>,
    wake: Arc<dyn IdleWake>,
    pump: Arc<dyn EventPump>,
    sink: Arc<dyn FailureSink>,
    capture_caller_trace: bool,
}

impl Dispatcher {
    /// Starts building a dispatcher around the given wake hook.
    ///
    /// Call [`DispatcherBuilder::build`] on the affinity thread.
    pub fn builder(wake: Arc<dyn IdleWake>) -> DispatcherBuilder {
        DispatcherBuilder {
            wake,
            pump: Arc::new(NoopPump),
            sink: Arc::new(TracingSink),
            capture_caller_trace: None,
        }
    }

    /// Queues `callback` for the affinity thread and returns immediately,
    /// regardless of the calling thread.
    pub fn dispatch(&self, callback: impl FnOnce() + Send + 'static) {
        let envelope = Envelope::new(Box::new(callback), self.caller_trace());
        self.inner
            .affinity_queue
            .enqueue(envelope, self.inner.wake.as_ref());
    }

    /// Stateful variant of [`dispatch`](Self::dispatch).
    pub fn dispatch_with<T: Send + 'static>(
        &self,
        callback: impl FnOnce(T) + Send + 'static,
        state: T,
    ) {
        self.dispatch(move || callback(state));
    }

    /// Runs `callback` on the affinity thread and blocks until it finished.
    ///
    /// On the affinity thread itself the callback runs inline without ever
    /// touching the queue, so there is no deadlock risk and a panic
    /// propagates as usual. From any other thread the call blocks on a
    /// primitive dedicated to this one envelope until the affinity thread's
    /// drain completes it; a panic in the callback comes back as
    /// [`DispatchError::CallbackPanicked`] with the original payload
    /// preserved.
    ///
    /// There is no timeout: if the affinity thread's loop stops draining,
    /// this call blocks indefinitely.
    pub fn dispatch_sync(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<(), DispatchError> {
        if self.is_affinity_thread() {
            callback();
            return Ok(());
        }

        let completion = Arc::new(Completion::new());
        let envelope =
            Envelope::with_completion(Box::new(callback), completion.clone(), self.caller_trace());
        self.inner
            .affinity_queue
            .enqueue(envelope, self.inner.wake.as_ref());
        completion.wait()
    }

    /// Stateful variant of [`dispatch_sync`](Self::dispatch_sync).
    pub fn dispatch_sync_with<T: Send + 'static>(
        &self,
        callback: impl FnOnce(T) + Send + 'static,
        state: T,
    ) -> Result<(), DispatchError> {
        self.dispatch_sync(move || callback(state))
    }

    /// Queues `callback` on the shared background worker.
    ///
    /// The worker consumes its queue serially; a long-running callback
    /// delays everything queued after it. No synchronous variant exists on
    /// this path: use [`dispatch_sync`](Self::dispatch_sync) or
    /// [`dispatch_detached`](Self::dispatch_detached) for work that needs a
    /// result or must not be serialized.
    pub fn dispatch_background(&self, callback: impl FnOnce() + Send + 'static) {
        let envelope = Envelope::new(Box::new(callback), self.caller_trace());
        self.inner.background_queue.enqueue(envelope);
    }

    /// Stateful variant of [`dispatch_background`](Self::dispatch_background).
    pub fn dispatch_background_with<T: Send + 'static>(
        &self,
        callback: impl FnOnce(T) + Send + 'static,
        state: T,
    ) {
        self.dispatch_background(move || callback(state));
    }

    /// Runs `callback` on a brand-new thread, bypassing the shared worker.
    pub fn dispatch_detached(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<(), DispatchError> {
        let envelope = Envelope::new(Box::new(callback), self.caller_trace());
        let sink = self.inner.sink.clone();
        thread::Builder::new()
            .name("spindle-detached".to_string())
            .spawn(move || envelope.deliver(DispatchOrigin::Detached, sink.as_ref()))?;
        Ok(())
    }

    /// Stateful variant of [`dispatch_detached`](Self::dispatch_detached).
    pub fn dispatch_detached_with<T: Send + 'static>(
        &self,
        callback: impl FnOnce(T) + Send + 'static,
        state: T,
    ) -> Result<(), DispatchError> {
        self.dispatch_detached(move || callback(state))
    }

    /// Whether the calling thread is the affinity thread.
    #[must_use]
    pub fn is_affinity_thread(&self) -> bool {
        thread::current().id() == self.inner.affinity_thread
    }

    /// Panics when called off the affinity thread.
    ///
    /// For precondition checks in code that manipulates thread-affine state;
    /// a failure signals a bug in the caller, not a recoverable condition.
    pub fn assert_affinity_thread(&self) {
        assert!(
            self.is_affinity_thread(),
            "this operation may only be performed on the affinity thread"
        );
    }

    /// Wraps `callback` so every invocation is a blocking affinity dispatch.
    ///
    /// Adapts handlers for external event sources that fire from arbitrary
    /// threads: the wrapped callable always runs on the affinity thread, and
    /// the firing thread observes its completion (or failure).
    pub fn synchronized<F>(&self, callback: F) -> Synchronized<F>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Synchronized {
            dispatcher: self.clone(),
            callback: Arc::new(callback),
        }
    }

    /// Runs any pending toolkit events, then forces one affinity drain pass.
    ///
    /// For code that must make progress "until the UI goes idle" without
    /// returning to the toolkit's own event loop. Affinity-thread-only.
    pub fn pump_pending_events(&self) {
        self.assert_affinity_thread();
        self.inner.pump.pump();
        let _ = self.inner.affinity_queue.drain_once(self.inner.sink.as_ref());
    }

    /// Drains one bounded pass of the affinity queue.
    ///
    /// The composition root's event loop calls this from the affinity thread
    /// whenever the wake hook fires, repeating while the status is
    /// [`DrainStatus::MorePending`].
    pub fn drain_once(&self) -> DrainStatus {
        self.assert_affinity_thread();
        self.inner.affinity_queue.drain_once(self.inner.sink.as_ref())
    }

    fn caller_trace(&self) -> Option<Backtrace> {
        self.inner
            .capture_caller_trace
            .then(Backtrace::force_capture)
    }
}

/// Builds a [`Dispatcher`]; see [`Dispatcher::builder`].
pub struct DispatcherBuilder {
    wake: Arc<dyn IdleWake>,
    pump: Arc<dyn EventPump>,
    sink: Arc<dyn FailureSink>,
    capture_caller_trace: Option<bool>,
}

impl DispatcherBuilder {
    /// Supplies the toolkit event pump used by
    /// [`Dispatcher::pump_pending_events`]. Defaults to a no-op.
    #[must_use]
    pub fn event_pump(mut self, pump: Arc<dyn EventPump>) -> Self {
        self.pump = pump;
        self
    }

    /// Supplies the sink receiving unobserved callback failures. Defaults to
    /// [`TracingSink`].
    #[must_use]
    pub fn failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Overrides the [`DISPATCH_DEBUG_ENV`] toggle for caller stack capture.
    #[must_use]
    pub fn capture_caller_traces(mut self, enabled: bool) -> Self {
        self.capture_caller_trace = Some(enabled);
        self
    }

    /// Records the calling thread as the affinity thread and spawns the
    /// background worker.
    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        let capture_caller_trace = self
            .capture_caller_trace
            .unwrap_or_else(debug_capture_from_env);
        let background_queue = Arc::new(BackgroundQueue::new());
        background::spawn_worker(background_queue.clone(), self.sink.clone())?;

        Ok(Dispatcher {
            inner: Arc::new(Shared {
                affinity_thread: thread::current().id(),
                affinity_queue: AffinityQueue::new(),
                background_queue,
                wake: self.wake,
                pump: self.pump,
                sink: self.sink,
                capture_caller_trace,
            }),
        })
    }
}

/// A callable adapted by [`Dispatcher::synchronized`].
pub struct Synchronized<F> {
    dispatcher: Dispatcher,
    callback: Arc<F>,
}

impl<F> Clone for Synchronized<F> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            callback: self.callback.clone(),
        }
    }
}

impl<F> Synchronized<F>
where
    F: Fn() + Send + Sync + 'static,
{
    /// Blocking affinity dispatch of the wrapped callable.
    pub fn call(&self) -> Result<(), DispatchError> {
        let callback = self.callback.clone();
        self.dispatcher.dispatch_sync(move || (*callback)())
    }
}

fn debug_capture_from_env() -> bool {
    env::var(DISPATCH_DEBUG_ENV).is_ok_and(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::Dispatcher;
    use crate::hooks::IdleWake;

    #[derive(Default)]
    struct CountingWake {
        requests: AtomicUsize,
    }

    impl IdleWake for CountingWake {
        fn request_wake(&self) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_dispatcher(wake: Arc<CountingWake>) -> Dispatcher {
        Dispatcher::builder(wake)
            .capture_caller_traces(false)
            .build()
            .expect("dispatcher built on test thread")
    }

    #[test]
    fn constructing_thread_is_the_affinity_thread() {
        let dispatcher = test_dispatcher(Arc::new(CountingWake::default()));
        assert!(dispatcher.is_affinity_thread());
        dispatcher.assert_affinity_thread();
    }

    #[test]
    fn clones_share_the_affinity_binding() {
        let dispatcher = test_dispatcher(Arc::new(CountingWake::default()));
        let clone = dispatcher.clone();

        let handle = std::thread::spawn(move || clone.is_affinity_thread());
        assert!(!handle.join().expect("identity check thread"));
    }

    #[test]
    fn sync_dispatch_on_affinity_thread_runs_inline_without_wake() {
        let wake = Arc::new(CountingWake::default());
        let dispatcher = test_dispatcher(wake.clone());
        let ran = Arc::new(AtomicUsize::new(0));

        let seen = ran.clone();
        dispatcher
            .dispatch_sync(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .expect("inline dispatch");

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(wake.requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn synchronized_wrapper_runs_inline_on_affinity_thread() {
        let dispatcher = test_dispatcher(Arc::new(CountingWake::default()));
        let ran = Arc::new(AtomicUsize::new(0));

        let seen = ran.clone();
        let wrapped = dispatcher.synchronized(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        wrapped.call().expect("synchronized call");
        wrapped.call().expect("synchronized call");
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stateful_dispatch_captures_state_by_value() {
        let dispatcher = test_dispatcher(Arc::new(CountingWake::default()));
        let observed = Arc::new(AtomicUsize::new(0));

        let seen = observed.clone();
        dispatcher
            .dispatch_sync_with(
                move |value: usize| {
                    seen.store(value, Ordering::SeqCst);
                },
                42,
            )
            .expect("inline stateful dispatch");

        assert_eq!(observed.load(Ordering::SeqCst), 42);
    }
}
