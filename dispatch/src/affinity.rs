//! The affinity-thread queue and its drain protocol.
//!
//! Producers on any thread append envelopes; the affinity thread's event
//! loop drains them in bounded passes when nudged by the injected
//! [`IdleWake`]. The wake-registration flag lives under the same lock as the
//! queue: it is set (and the hook invoked) exactly when a push finds no wake
//! outstanding, and cleared exactly when a drain pass observes the queue
//! empty, so at most one wake request is ever in flight.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::envelope::Envelope;
use crate::hooks::{DispatchOrigin, FailureSink, IdleWake};

/// Outcome of one affinity drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum DrainStatus {
    /// The queue was left empty and the wake registration cleared; the
    /// event loop can go idle until the next wake request.
    Drained,
    /// Envelopes arrived during the pass; the event loop should invoke
    /// another drain before going idle.
    MorePending,
}

pub(crate) struct AffinityQueue {
    inner: Mutex<Inner>,
}

struct Inner {
    queue: VecDeque<Envelope>,
    wake_registered: bool,
}

impl AffinityQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                wake_registered: false,
            }),
        }
    }

    /// Appends an envelope, requesting a wake-up if none is outstanding.
    ///
    /// The hook is invoked under the queue lock so the at-most-one-wake
    /// invariant holds across racing producers; see [`IdleWake`] for the
    /// no-re-entry requirement this places on implementations.
    pub(crate) fn enqueue(&self, envelope: Envelope, wake: &dyn IdleWake) {
        let mut inner = self.inner.lock().expect("affinity queue lock poisoned");
        inner.queue.push_back(envelope);
        if !inner.wake_registered {
            inner.wake_registered = true;
            wake.request_wake();
        }
    }

    /// Drains one bounded pass: at most the number of envelopes present at
    /// entry, so producers outpacing the affinity thread cannot pin a single
    /// event-loop tick forever.
    ///
    /// Envelopes execute outside the lock. Re-entrant enqueues made by a
    /// running callback are never lost, but only a later pass picks them up
    /// (signalled by [`DrainStatus::MorePending`]).
    pub(crate) fn drain_once(&self, sink: &dyn FailureSink) -> DrainStatus {
        let pass_len = {
            let mut inner = self.inner.lock().expect("affinity queue lock poisoned");
            if inner.queue.is_empty() {
                inner.wake_registered = false;
                return DrainStatus::Drained;
            }
            inner.queue.len()
        };

        for _ in 0..pass_len {
            let envelope = {
                let mut inner = self.inner.lock().expect("affinity queue lock poisoned");
                match inner.queue.pop_front() {
                    Some(envelope) => envelope,
                    None => {
                        inner.wake_registered = false;
                        return DrainStatus::Drained;
                    }
                }
            };

            envelope.deliver(DispatchOrigin::Affinity, sink);
        }

        let mut inner = self.inner.lock().expect("affinity queue lock poisoned");
        if inner.queue.is_empty() {
            inner.wake_registered = false;
            DrainStatus::Drained
        } else {
            DrainStatus::MorePending
        }
    }
}
