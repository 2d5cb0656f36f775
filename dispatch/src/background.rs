//! The shared background queue and its worker loop.
//!
//! One perpetual worker thread consumes the queue for the lifetime of the
//! process: when idle it sleeps a bounded interval and re-checks (polling
//! rather than a blocking wait, trading some latency for simplicity),
//! otherwise it pops exactly one envelope under the lock and runs it
//! outside. There is no synchronous delivery on this queue; callers that
//! need a result use the blocking affinity path or a detached thread.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::envelope::Envelope;
use crate::hooks::{DispatchOrigin, FailureSink};

/// How long the worker sleeps between queue checks when idle.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) struct BackgroundQueue {
    queue: Mutex<VecDeque<Envelope>>,
}

impl BackgroundQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn enqueue(&self, envelope: Envelope) {
        self.queue
            .lock()
            .expect("background queue lock poisoned")
            .push_back(envelope);
    }

    fn pop(&self) -> Option<Envelope> {
        self.queue
            .lock()
            .expect("background queue lock poisoned")
            .pop_front()
    }
}

/// Spawns the perpetual worker thread. There is no shutdown protocol; the
/// thread lives until the process exits.
pub(crate) fn spawn_worker(
    queue: Arc<BackgroundQueue>,
    sink: Arc<dyn FailureSink>,
) -> io::Result<()> {
    thread::Builder::new()
        .name("spindle-background".to_string())
        .spawn(move || {
            lower_thread_priority();
            debug!("background dispatch worker started");
            worker_loop(&queue, sink.as_ref());
        })?;
    Ok(())
}

fn worker_loop(queue: &BackgroundQueue, sink: &dyn FailureSink) {
    loop {
        let Some(envelope) = queue.pop() else {
            thread::sleep(POLL_INTERVAL);
            continue;
        };
        envelope.deliver(DispatchOrigin::Background, sink);
    }
}

/// Best effort; background work must never compete with the affinity thread.
#[cfg(unix)]
fn lower_thread_priority() {
    // SAFETY: setpriority with PRIO_PROCESS and pid 0 adjusts only the
    // calling thread on Linux.
    unsafe {
        let _ = libc::setpriority(libc::PRIO_PROCESS, 0, 10);
    }
}

#[cfg(not(unix))]
fn lower_thread_priority() {}
