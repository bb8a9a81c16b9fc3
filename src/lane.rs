//! Handler lanes: one worker thread per frame consumer.
//!
//! A lane holds at most one frame. When its worker is still busy with the
//! previous frame, `offer` skips the new one for that lane only; the other
//! lane and the capture loop never wait.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender};
use serde::Serialize;

use crate::frame::Frame;

/// Consumer of captured frames. Runs on its lane's worker thread.
pub trait FrameHandler: Send + 'static {
    fn handle(&mut self, frame: &Frame);
}

impl<F> FrameHandler for F
where
    F: FnMut(&Frame) + Send + 'static,
{
    fn handle(&mut self, frame: &Frame) {
        self(frame)
    }
}

#[derive(Default)]
struct LaneCounters {
    offered: AtomicU64,
    accepted: AtomicU64,
    skipped: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LaneStats {
    pub offered: u64,
    pub accepted: u64,
    /// Frames not handed over because the worker was busy.
    pub skipped: u64,
    pub completed: u64,
    pub panicked: u64,
}

pub struct HandlerLane {
    name: &'static str,
    busy: Arc<AtomicBool>,
    tx: Option<Sender<Arc<Frame>>>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<LaneCounters>,
}

impl HandlerLane {
    pub fn spawn(name: &'static str, mut handler: Box<dyn FrameHandler>) -> Result<Self> {
        let (tx, rx) = bounded::<Arc<Frame>>(1);
        let busy = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(LaneCounters::default());

        let worker_busy = Arc::clone(&busy);
        let worker_counters = Arc::clone(&counters);
        let worker = thread::Builder::new()
            .name(format!("lane-{}", name))
            .spawn(move || {
                for frame in rx {
                    let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(&frame)));
                    drop(frame);
                    match outcome {
                        Ok(()) => {
                            worker_counters.completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            worker_counters.panicked.fetch_add(1, Ordering::Relaxed);
                            log::error!("HandlerLane: {} handler panicked; frame dropped", name);
                        }
                    }
                    worker_busy.store(false, Ordering::Release);
                }
            })
            .with_context(|| format!("spawn {} lane worker", name))?;

        Ok(Self {
            name,
            busy,
            tx: Some(tx),
            worker: Some(worker),
            counters,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Hand a frame to the worker if it is idle. Returns whether it was taken.
    pub fn offer(&self, frame: &Arc<Frame>) -> bool {
        self.counters.offered.fetch_add(1, Ordering::Relaxed);
        let Some(tx) = self.tx.as_ref() else {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match tx.try_send(Arc::clone(frame)) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.busy.store(false, Ordering::Release);
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Poll until the worker is idle. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_busy() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    pub fn stats(&self) -> LaneStats {
        let c = &self.counters;
        LaneStats {
            offered: c.offered.load(Ordering::Relaxed),
            accepted: c.accepted.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
        }
    }

    /// Close the lane and wait for the in-flight frame, if any.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("HandlerLane: {} worker exited abnormally", self.name);
            }
        }
    }
}

impl Drop for HandlerLane {
    fn drop(&mut self) {
        self.shutdown();
    }
}
