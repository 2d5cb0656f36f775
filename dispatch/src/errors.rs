//! Error types for the dispatch crate.

use std::io;

use thiserror::Error;

/// Failure surfaced by a dispatch operation.
///
/// Affinity violations are deliberately *not* represented here: calling an
/// affinity-only operation from the wrong thread is a bug in the caller and
/// panics via [`crate::Dispatcher::assert_affinity_thread`] instead of
/// returning a recoverable error.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A synchronously dispatched callback panicked on the affinity thread.
    ///
    /// The panic was caught by the executing thread and handed back to the
    /// waiting caller; `message` is the rendered panic payload.
    #[error("a dispatched callback panicked on the affinity thread: {message}")]
    CallbackPanicked { message: String },

    /// Creating the background or a detached worker thread failed.
    #[error("failed to spawn dispatch worker thread")]
    WorkerSpawn(#[from] io::Error),
}
