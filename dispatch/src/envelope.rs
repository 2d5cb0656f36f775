//! The unit of deferred work handed between threads.
//!
//! An [`Envelope`] wraps one callback together with everything the consuming
//! thread needs to report its outcome: a per-envelope completion primitive
//! for synchronous deliveries, and the captured panic plus optional caller
//! backtrace for asynchronous ones. Panics raised by the callback are caught
//! and stored, never propagated, so a queue drain can't abort mid-batch
//! because one callback failed.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};

use crate::errors::DispatchError;
use crate::hooks::{DispatchFailure, DispatchOrigin, FailureSink};

pub(crate) type Work = Box<dyn FnOnce() + Send + 'static>;

/// Dedicated wait/notify primitive owned by one synchronous envelope.
///
/// Each blocking dispatch gets its own pair, so unrelated concurrent
/// synchronous calls never contend for wake-ups on a shared condition
/// variable.
pub(crate) struct Completion {
    slot: Mutex<Option<Result<(), DispatchError>>>,
    done: Condvar,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// Stores the outcome and wakes the dispatching thread.
    ///
    /// Called exactly once, by the thread that executed the envelope.
    pub(crate) fn finish(&self, outcome: Result<(), DispatchError>) {
        let mut slot = self.slot.lock().expect("completion lock poisoned");
        *slot = Some(outcome);
        self.done.notify_all();
    }

    /// Blocks until [`Completion::finish`] has stored an outcome.
    pub(crate) fn wait(&self) -> Result<(), DispatchError> {
        let mut slot = self.slot.lock().expect("completion lock poisoned");
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            slot = self.done.wait(slot).expect("completion lock poisoned");
        }
    }
}

pub(crate) struct Envelope {
    work: Option<Work>,
    completion: Option<Arc<Completion>>,
    caller_trace: Option<Backtrace>,
    failure: Option<String>,
}

impl Envelope {
    pub(crate) fn new(work: Work, caller_trace: Option<Backtrace>) -> Self {
        Self {
            work: Some(work),
            completion: None,
            caller_trace,
            failure: None,
        }
    }

    pub(crate) fn with_completion(
        work: Work,
        completion: Arc<Completion>,
        caller_trace: Option<Backtrace>,
    ) -> Self {
        Self {
            work: Some(work),
            completion: Some(completion),
            caller_trace,
            failure: None,
        }
    }

    pub(crate) fn is_synchronous(&self) -> bool {
        self.completion.is_some()
    }

    pub(crate) fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Invokes the wrapped callback exactly once, storing any panic.
    ///
    /// Subsequent calls are no-ops; the callback is consumed on first run.
    pub(crate) fn run(&mut self) {
        let Some(work) = self.work.take() else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
            self.failure = Some(panic_message(payload.as_ref()));
        }
    }

    /// Runs the envelope and routes its outcome.
    ///
    /// Synchronous envelopes complete their waiter; failed asynchronous ones
    /// go to the sink. A successful asynchronous envelope needs no routing.
    pub(crate) fn deliver(mut self, origin: DispatchOrigin, sink: &dyn FailureSink) {
        self.run();
        if let Some(completion) = self.completion.take() {
            let outcome = match self.failure.take() {
                Some(message) => Err(DispatchError::CallbackPanicked { message }),
                None => Ok(()),
            };
            completion.finish(outcome);
        } else if let Some(message) = self.failure.take() {
            sink.report(DispatchFailure {
                origin,
                panic_message: message,
                caller_trace: self.caller_trace.take(),
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
