//! Shared test harness for the dispatch integration suite.
//!
//! Spins up a real affinity event loop on a dedicated thread: an
//! mpsc-channel-backed wake hook nudges the loop, which drains the
//! dispatcher until it reports no more work, matching how a composition
//! root is expected to integrate the dispatcher with a toolkit idle
//! callback.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use spindle_dispatch::{
    DispatchFailure, Dispatcher, DrainStatus, EventPump, FailureSink, IdleWake,
};

/// Wake hook that counts requests and nudges the loop thread via a channel.
pub struct ChannelWake {
    tx: Mutex<mpsc::Sender<()>>,
    requests: AtomicUsize,
}

impl ChannelWake {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl IdleWake for ChannelWake {
    fn request_wake(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.lock().expect("wake sender lock").send(());
    }
}

/// Wake hook that only counts; for tests that drain manually.
#[derive(Default)]
pub struct CountingWake {
    requests: AtomicUsize,
}

impl CountingWake {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl IdleWake for CountingWake {
    fn request_wake(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Event pump that records invocations.
#[derive(Default)]
pub struct CountingPump {
    pumps: AtomicUsize,
}

impl CountingPump {
    pub fn pumps(&self) -> usize {
        self.pumps.load(Ordering::SeqCst)
    }
}

impl EventPump for CountingPump {
    fn pump(&self) {
        self.pumps.fetch_add(1, Ordering::SeqCst);
    }
}

/// Failure sink that collects everything it receives.
#[derive(Default)]
pub struct CollectingSink {
    failures: Mutex<Vec<DispatchFailure>>,
}

impl CollectingSink {
    pub fn failures(&self) -> Vec<DispatchFailure> {
        std::mem::take(&mut *self.failures.lock().expect("sink lock"))
    }

    pub fn count(&self) -> usize {
        self.failures.lock().expect("sink lock").len()
    }
}

impl FailureSink for CollectingSink {
    fn report(&self, failure: DispatchFailure) {
        self.failures.lock().expect("sink lock").push(failure);
    }
}

/// A dispatcher bound to a dedicated affinity thread running a drain loop.
pub struct AffinityLoop {
    pub dispatcher: Dispatcher,
    pub wake: Arc<ChannelWake>,
    pub sink: Arc<CollectingSink>,
    pub affinity_thread: ThreadId,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AffinityLoop {
    pub fn start() -> Self {
        let (wake_tx, wake_rx) = mpsc::channel();
        let wake = Arc::new(ChannelWake {
            tx: Mutex::new(wake_tx),
            requests: AtomicUsize::new(0),
        });
        let sink = Arc::new(CollectingSink::default());
        let shutdown = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let loop_wake = wake.clone();
        let loop_sink = sink.clone();
        let loop_shutdown = shutdown.clone();
        let handle = thread::Builder::new()
            .name("test-affinity".to_string())
            .spawn(move || {
                let dispatcher = Dispatcher::builder(loop_wake)
                    .failure_sink(loop_sink)
                    .capture_caller_traces(false)
                    .build()
                    .expect("dispatcher for affinity loop");
                ready_tx
                    .send((dispatcher.clone(), thread::current().id()))
                    .expect("publish dispatcher to the test thread");

                while !loop_shutdown.load(Ordering::Acquire) {
                    match wake_rx.recv_timeout(Duration::from_millis(20)) {
                        Ok(()) => {
                            while dispatcher.drain_once() == DrainStatus::MorePending {}
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("spawn affinity loop thread");

        let (dispatcher, affinity_thread) = ready_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("affinity loop came up");

        Self {
            dispatcher,
            wake,
            sink,
            affinity_thread,
            shutdown,
            handle: Some(handle),
        }
    }
}

impl Drop for AffinityLoop {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
