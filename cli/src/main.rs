//! Spindle demo - a composition root for the dispatch service.
//!
//! Stands in for the GUI toolkit this crate is normally wired into: the main
//! thread plays the affinity thread, an mpsc channel plays the toolkit's
//! idle-wake facility, and a small recv-then-drain loop plays the event
//! loop.
//!
//! ```text
//! main() -> Dispatcher::builder(wake).build() -> spawn worker threads
//!               |                                      |
//!               v                                      v
//!      recv wake, drain_once()  <------  dispatch / dispatch_sync /
//!      while MorePending                 dispatch_background / detached
//! ```
//!
//! Every dispatched callback bumps a shared counter; the loop exits once all
//! expected work has been observed on its proper thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, ensure};
use tracing::info;
use tracing_subscriber::EnvFilter;

use spindle_dispatch::{Dispatcher, DrainStatus, IdleWake};

const WORKERS: usize = 3;
// async + sync + background + synchronized handler, per worker
const DISPATCHES_PER_WORKER: usize = 4;
const DEMO_DEADLINE: Duration = Duration::from_secs(10);

/// Toolkit idle-wake stand-in: nudges the main loop through a channel.
struct ChannelWake {
    tx: mpsc::Sender<()>,
}

impl IdleWake for ChannelWake {
    fn request_wake(&self) {
        let _ = self.tx.send(());
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();

    let (wake_tx, wake_rx) = mpsc::channel();
    let dispatcher = Dispatcher::builder(Arc::new(ChannelWake { tx: wake_tx })).build()?;
    let completed = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for worker in 0..WORKERS {
        workers.push(spawn_worker(worker, dispatcher.clone(), completed.clone()));
    }

    // One detached thread from the composition root itself.
    let detached_done = completed.clone();
    dispatcher.dispatch_detached_with(
        move |tag: &str| {
            info!(tag, "detached dispatch ran on its own thread");
            detached_done.fetch_add(1, Ordering::SeqCst);
        },
        "composition-root",
    )?;

    let total = WORKERS * DISPATCHES_PER_WORKER + 1;
    let deadline = Instant::now() + DEMO_DEADLINE;
    while completed.load(Ordering::SeqCst) < total && Instant::now() < deadline {
        match wake_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(()) => {
                while dispatcher.drain_once() == DrainStatus::MorePending {}
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Catch stragglers enqueued after the last wake we consumed, so no
    // worker is left blocked on a queued synchronous dispatch.
    dispatcher.pump_pending_events();

    for worker in workers {
        let _ = worker.join();
    }

    let observed = completed.load(Ordering::SeqCst);
    ensure!(
        observed == total,
        "observed {observed} of {total} dispatches before the deadline"
    );
    info!(total, "demo complete; every dispatch ran on its proper thread");
    Ok(())
}

fn spawn_worker(
    worker: usize,
    dispatcher: Dispatcher,
    completed: Arc<AtomicUsize>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        // Fire-and-forget onto the affinity thread.
        let on_affinity = dispatcher.clone();
        let done = completed.clone();
        dispatcher.dispatch(move || {
            on_affinity.assert_affinity_thread();
            info!(worker, "async dispatch ran on the affinity thread");
            done.fetch_add(1, Ordering::SeqCst);
        });

        // Blocking round trip: returns only after the main thread ran it.
        let done = completed.clone();
        dispatcher
            .dispatch_sync_with(
                move |worker: usize| {
                    info!(worker, "sync dispatch ran on the affinity thread");
                    done.fetch_add(1, Ordering::SeqCst);
                },
                worker,
            )
            .expect("sync dispatch");

        // Serialized work on the shared background thread.
        let done = completed.clone();
        dispatcher.dispatch_background_with(
            move |worker: usize| {
                info!(worker, "background dispatch ran on the shared worker");
                done.fetch_add(1, Ordering::SeqCst);
            },
            worker,
        );

        // An "event handler" adapted to always run on the affinity thread.
        let on_affinity = dispatcher.clone();
        let done = completed.clone();
        let handler = dispatcher.synchronized(move || {
            on_affinity.assert_affinity_thread();
            done.fetch_add(1, Ordering::SeqCst);
        });
        handler.call().expect("synchronized handler");
        info!(worker, "synchronized handler marshaled onto the affinity thread");
    })
}
