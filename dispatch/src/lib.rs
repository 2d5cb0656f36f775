//! Cross-thread dispatch for thread-affine application state.
//!
//! Many toolkits permit exactly one thread (here the *affinity* thread,
//! typically the process's main/UI thread) to touch certain state, while
//! the work that needs that state originates on arbitrary threads. This
//! crate provides the hand-off machinery:
//!
//! - **Fire-and-forget** dispatch onto the affinity thread, drained in
//!   bounded batches by whatever event loop owns that thread.
//! - **Blocking** dispatch that suspends the caller until the affinity
//!   thread ran the callback, with panics carried back across the thread
//!   boundary as [`DispatchError::CallbackPanicked`].
//! - A single shared **background** worker thread, plus one-off
//!   **detached** threads for work that must not serialize behind it.
//!
//! The event-loop integration is injected, not owned: the composition root
//! supplies an [`IdleWake`] that nudges the affinity thread's loop and calls
//! [`Dispatcher::drain_once`] when it fires. Callback panics nobody waits
//! for go to the injected [`FailureSink`] rather than unwinding a consumer
//! loop.

mod affinity;
mod background;
mod envelope;
mod errors;
mod hooks;
mod service;

pub use affinity::DrainStatus;
pub use errors::DispatchError;
pub use hooks::{
    DispatchFailure, DispatchOrigin, EventPump, FailureSink, IdleWake, NoopPump, TracingSink,
};
pub use service::{DISPATCH_DEBUG_ENV, Dispatcher, DispatcherBuilder, Synchronized};
