//! Injected collaborators for the dispatcher.
//!
//! The dispatcher never talks to a concrete event loop or logger. The
//! composition root supplies these hooks: an [`IdleWake`] that nudges the
//! affinity thread's loop, an [`EventPump`] that runs pending toolkit
//! events, and a [`FailureSink`] that receives callback panics nobody is
//! waiting on. [`TracingSink`] and [`NoopPump`] are the stock
//! implementations.

use std::backtrace::Backtrace;
use std::fmt;

use tracing::error;

use crate::service::DISPATCH_DEBUG_ENV;

/// Single-shot "call me back on the affinity thread's loop, once, soon".
///
/// The dispatcher requests at most one wake-up at a time: a new request is
/// only issued after a drain pass has observed the queue empty. The request
/// is made while the queue lock is held, so implementations must only
/// *register* the wake-up and return; synchronously re-entering the
/// dispatcher would deadlock.
pub trait IdleWake: Send + Sync {
    fn request_wake(&self);
}

/// Runs all currently pending toolkit events synchronously.
///
/// Used by [`crate::Dispatcher::pump_pending_events`] to force progress
/// without returning control to the toolkit's own loop.
pub trait EventPump: Send + Sync {
    fn pump(&self);
}

/// Receives callback failures that have no waiter to deliver them to.
pub trait FailureSink: Send + Sync {
    fn report(&self, failure: DispatchFailure);
}

/// Which consumer a failed envelope was dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOrigin {
    Affinity,
    Background,
    Detached,
}

impl DispatchOrigin {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DispatchOrigin::Affinity => "affinity",
            DispatchOrigin::Background => "background",
            DispatchOrigin::Detached => "detached",
        }
    }
}

impl fmt::Display for DispatchOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A callback panic with no waiter, as handed to the [`FailureSink`].
#[derive(Debug)]
pub struct DispatchFailure {
    pub origin: DispatchOrigin,
    /// Rendered panic payload of the failed callback.
    pub panic_message: String,
    /// Backtrace of the dispatching call site, present only when caller
    /// trace capture was enabled at service construction.
    pub caller_trace: Option<Backtrace>,
}

/// [`FailureSink`] that reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FailureSink for TracingSink {
    fn report(&self, failure: DispatchFailure) {
        match failure.caller_trace {
            Some(trace) => {
                error!(
                    origin = failure.origin.as_str(),
                    caller_trace = %trace,
                    "dispatched callback panicked: {}",
                    failure.panic_message
                );
            }
            None => {
                error!(
                    origin = failure.origin.as_str(),
                    "dispatched callback panicked: {} (caller stack not available; set \
                     {DISPATCH_DEBUG_ENV} to enable caller stack capture)",
                    failure.panic_message
                );
            }
        }
    }
}

/// [`EventPump`] for composition roots without a toolkit event queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPump;

impl EventPump for NoopPump {
    fn pump(&self) {}
}
