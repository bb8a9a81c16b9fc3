//! Capture loop.
//!
//! The capture thread owns the active device. Control (switch device,
//! orientation change, stop) reaches it over a command channel, so the device
//! is never shared behind a lock.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::Serialize;

use super::CaptureDevice;
use crate::frame::{DeviceOrientation, Frame, Orientation, Rotation};
use crate::lane::{FrameHandler, HandlerLane, LaneStats};

/// Pause after a failed capture before trying the device again.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(10);
/// Log the first capture failure, then every Nth.
const FAILURE_LOG_EVERY: u64 = 100;

// ----------------------------------------------------------------------------
// Session gate
// ----------------------------------------------------------------------------

/// Running flag plus a generation counter bumped on every start and stop.
///
/// Work tagged with an older generation belongs to a session that has since
/// stopped and must not publish.
#[derive(Debug, Default)]
pub struct SessionGate {
    running: AtomicBool,
    generation: AtomicU64,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new generation and mark it running.
    pub fn open(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.running.store(true, Ordering::Release);
        generation
    }

    pub fn close(&self) {
        self.running.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// True while `generation` is the live one.
    pub fn admits(&self, generation: u64) -> bool {
        self.is_running() && self.generation() == generation
    }
}

// ----------------------------------------------------------------------------
// Frame source
// ----------------------------------------------------------------------------

/// Consumers fed by the source, one lane each.
pub struct FrameHandlers {
    pub preview: Box<dyn FrameHandler>,
    pub inference: Box<dyn FrameHandler>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct FrameSourceStats {
    pub frames_captured: u64,
    pub capture_errors: u64,
    pub device: Option<String>,
    pub preview: LaneStats,
    pub inference: LaneStats,
}

enum Command {
    SwitchDevice(Box<dyn CaptureDevice>, Sender<Box<dyn CaptureDevice>>),
    SetOrientation(DeviceOrientation),
    Stop,
}

struct Lanes {
    preview: HandlerLane,
    inference: HandlerLane,
}

#[derive(Default)]
struct Counters {
    sequence: AtomicU64,
    captured: AtomicU64,
    errors: AtomicU64,
    device: Mutex<Option<String>>,
}

impl Counters {
    fn set_device(&self, selector: Option<String>) {
        *self.device.lock().unwrap_or_else(PoisonError::into_inner) = selector;
    }

    fn device(&self) -> Option<String> {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Read-only handle on a frame source's counters and lanes.
///
/// Stats and idle waits go through here so callers never need the owner of
/// the `FrameSource` (and whatever lock guards it) while they poll.
#[derive(Clone)]
pub struct SourceMonitor {
    lanes: Arc<Lanes>,
    counters: Arc<Counters>,
}

impl SourceMonitor {
    /// Wait until neither lane holds a frame. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.lanes.preview.wait_idle(timeout)
            && self
                .lanes
                .inference
                .wait_idle(deadline.saturating_duration_since(Instant::now()))
    }

    pub fn stats(&self) -> FrameSourceStats {
        FrameSourceStats {
            frames_captured: self.counters.captured.load(Ordering::Relaxed),
            capture_errors: self.counters.errors.load(Ordering::Relaxed),
            device: self.counters.device(),
            preview: self.lanes.preview.stats(),
            inference: self.lanes.inference.stats(),
        }
    }
}

struct CaptureThread {
    commands: Sender<Command>,
    handle: JoinHandle<Box<dyn CaptureDevice>>,
    selector: String,
}

pub struct FrameSource {
    gate: Arc<SessionGate>,
    origin: Instant,
    lanes: Arc<Lanes>,
    counters: Arc<Counters>,
    orientation: DeviceOrientation,
    capture: Option<CaptureThread>,
}

impl FrameSource {
    pub fn new(handlers: FrameHandlers, gate: Arc<SessionGate>) -> Result<Self> {
        let lanes = Lanes {
            preview: HandlerLane::spawn("preview", handlers.preview)?,
            inference: HandlerLane::spawn("inference", handlers.inference)?,
        };
        Ok(Self {
            gate,
            origin: Instant::now(),
            lanes: Arc::new(lanes),
            counters: Arc::new(Counters::default()),
            orientation: DeviceOrientation::Portrait,
            capture: None,
        })
    }

    pub fn gate(&self) -> &Arc<SessionGate> {
        &self.gate
    }

    /// True while a capture thread is alive.
    pub fn is_running(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|capture| !capture.handle.is_finished())
    }

    pub fn monitor(&self) -> SourceMonitor {
        SourceMonitor {
            lanes: Arc::clone(&self.lanes),
            counters: Arc::clone(&self.counters),
        }
    }

    /// Start capturing from an opened, configured device.
    pub fn start(&mut self, device: Box<dyn CaptureDevice>, target_fps: u32) -> Result<()> {
        if self.is_running() {
            return Err(anyhow!("frame source already running"));
        }
        if self.capture.is_some() {
            log::warn!("FrameSource: reaping capture thread that exited on its own");
            self.stop();
        }
        let selector = device.descriptor().selector.clone();
        let generation = self.gate.open();
        let (commands, rx) = unbounded();
        let worker = CaptureWorker {
            device,
            commands: rx,
            interval: frame_interval(target_fps),
            orientation: self.orientation,
            generation,
            origin: self.origin,
            lanes: Arc::clone(&self.lanes),
            counters: Arc::clone(&self.counters),
        };
        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || worker.run())
            .context("spawn capture thread");
        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                self.gate.close();
                return Err(err);
            }
        };
        log::info!(
            "FrameSource: capturing from {} (generation {})",
            selector,
            generation
        );
        self.counters.set_device(Some(selector.clone()));
        self.capture = Some(CaptureThread {
            commands,
            handle,
            selector,
        });
        Ok(())
    }

    /// Stop capturing and release the device. In-flight work is invalidated.
    pub fn stop(&mut self) {
        self.gate.close();
        let Some(capture) = self.capture.take() else {
            return;
        };
        self.counters.set_device(None);
        let _ = capture.commands.send(Command::Stop);
        match capture.handle.join() {
            Ok(device) => {
                let stats = device.stats();
                log::info!(
                    "FrameSource: released {} after {} frames",
                    capture.selector,
                    stats.frames_captured
                );
            }
            Err(_) => log::error!("FrameSource: capture thread panicked"),
        }
    }

    /// Swap the active device without stopping capture. The previous device
    /// is released once the capture thread has let go of it.
    pub fn switch_device(&mut self, device: Box<dyn CaptureDevice>) -> Result<()> {
        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| anyhow!("frame source not running"))?;
        let selector = device.descriptor().selector.clone();
        let (reply_tx, reply_rx) = unbounded();
        capture
            .commands
            .send(Command::SwitchDevice(device, reply_tx))
            .map_err(|_| anyhow!("capture thread has exited"))?;
        let previous = reply_rx
            .recv()
            .map_err(|_| anyhow!("capture thread exited during device switch"))?;
        log::info!(
            "FrameSource: switched {} -> {}",
            previous.descriptor().selector,
            selector
        );
        self.counters.set_device(Some(selector.clone()));
        capture.selector = selector;
        Ok(())
    }

    /// Orientation applied to every frame captured from now on.
    pub fn set_orientation(&mut self, orientation: DeviceOrientation) {
        self.orientation = orientation;
        if let Some(capture) = self.capture.as_ref() {
            let _ = capture.commands.send(Command::SetOrientation(orientation));
        }
    }

    pub fn orientation(&self) -> DeviceOrientation {
        self.orientation
    }

    /// Wait until neither lane holds a frame. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.monitor().wait_idle(timeout)
    }

    pub fn stats(&self) -> FrameSourceStats {
        self.monitor().stats()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn frame_interval(target_fps: u32) -> Option<Duration> {
    (target_fps > 0).then(|| Duration::from_secs_f64(1.0 / target_fps as f64))
}

// ----------------------------------------------------------------------------
// Capture thread
// ----------------------------------------------------------------------------

struct CaptureWorker {
    device: Box<dyn CaptureDevice>,
    commands: Receiver<Command>,
    interval: Option<Duration>,
    orientation: DeviceOrientation,
    generation: u64,
    origin: Instant,
    lanes: Arc<Lanes>,
    counters: Arc<Counters>,
}

impl CaptureWorker {
    fn run(mut self) -> Box<dyn CaptureDevice> {
        let mut next_due = Instant::now();
        loop {
            let wait = next_due.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                match self.commands.recv_timeout(wait) {
                    Ok(command) => {
                        if !self.apply(command) {
                            return self.device;
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return self.device,
                }
            }
            loop {
                match self.commands.try_recv() {
                    Ok(command) => {
                        if !self.apply(command) {
                            return self.device;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return self.device,
                }
            }

            next_due = Instant::now() + self.interval.unwrap_or(Duration::ZERO);
            self.capture_once();
        }
    }

    /// Returns false when the loop should exit.
    fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::Stop => false,
            Command::SetOrientation(orientation) => {
                self.orientation = orientation;
                true
            }
            Command::SwitchDevice(device, reply) => {
                let previous = std::mem::replace(&mut self.device, device);
                let _ = reply.send(previous);
                true
            }
        }
    }

    fn capture_once(&mut self) {
        let device = &mut self.device;
        let image = match catch_unwind(AssertUnwindSafe(|| device.next_image())) {
            Ok(Ok(image)) => image,
            Ok(Err(err)) => {
                self.capture_failed(&format!("{:#}", err));
                return;
            }
            Err(_) => {
                self.capture_failed("device panicked");
                return;
            }
        };

        let orientation = Orientation::new(
            Rotation::for_device(self.orientation),
            self.device.descriptor().is_mirrored(),
        );
        let sequence = self.counters.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = Frame::new(image, self.origin.elapsed(), orientation)
            .stamped(sequence, self.generation);
        let frame = Arc::new(frame);
        self.counters.captured.fetch_add(1, Ordering::Relaxed);

        self.lanes.preview.offer(&frame);
        self.lanes.inference.offer(&frame);
    }

    fn capture_failed(&self, reason: &str) {
        let errors = self.counters.errors.fetch_add(1, Ordering::Relaxed) + 1;
        if errors == 1 || errors % FAILURE_LOG_EVERY == 0 {
            log::warn!(
                "FrameSource: capture from {} failed ({} total): {}",
                self.device.descriptor().selector,
                errors,
                reason
            );
        }
        thread::sleep(CAPTURE_RETRY_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{
        CaptureSettings, DeviceDescriptor, LensPosition, SyntheticCamera,
    };
    use std::sync::Mutex;

    fn device(selector: &str, position: LensPosition) -> Result<Box<dyn CaptureDevice>> {
        let mut cam = SyntheticCamera::new(DeviceDescriptor::new(selector, position));
        cam.open()?;
        cam.configure(&CaptureSettings {
            width: 4,
            height: 4,
            target_fps: 200,
        })?;
        Ok(Box::new(cam))
    }

    type Seen = Arc<Mutex<Vec<(u64, Duration, Orientation, u64)>>>;

    fn recording_source() -> Result<(FrameSource, Seen)> {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handlers = FrameHandlers {
            preview: Box::new(move |f: &Frame| {
                sink.lock()
                    .unwrap()
                    .push((f.sequence, f.timestamp, f.orientation, f.generation()));
            }),
            inference: Box::new(|_f: &Frame| {}),
        };
        let source = FrameSource::new(handlers, Arc::new(SessionGate::new()))?;
        Ok((source, seen))
    }

    fn wait_for(seen: &Seen, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().unwrap().len() < n && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn gate_generations_advance_on_open_and_close() {
        let gate = SessionGate::new();
        let first = gate.open();
        assert!(gate.admits(first));
        gate.close();
        assert!(!gate.admits(first));
        let second = gate.open();
        assert!(second > first);
        assert!(!gate.admits(first));
        assert!(gate.admits(second));
    }

    #[test]
    fn frames_are_ordered_and_stamped() -> Result<()> {
        let (mut source, seen) = recording_source()?;
        source.start(device("stub://back", LensPosition::Back)?, 200)?;
        wait_for(&seen, 5);
        source.stop();

        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 5);
        for pair in seen.windows(2) {
            assert!(pair[0].0 < pair[1].0);
            assert!(pair[0].1 <= pair[1].1);
        }
        assert!(seen.iter().all(|s| !s.2.mirrored));
        Ok(())
    }

    #[test]
    fn orientation_and_device_changes_apply_to_later_frames() -> Result<()> {
        let (mut source, seen) = recording_source()?;
        source.start(device("stub://back", LensPosition::Back)?, 200)?;
        source.set_orientation(DeviceOrientation::LandscapeLeft);
        source.switch_device(device("stub://front", LensPosition::Front)?)?;
        let already = seen.lock().unwrap().len();
        wait_for(&seen, already + 3);
        source.stop();

        let seen = seen.lock().unwrap();
        let last = seen.last().map(|s| s.2);
        assert_eq!(
            last,
            Some(Orientation::new(Rotation::LandscapeRight, true))
        );
        Ok(())
    }

    #[test]
    fn timestamps_stay_monotonic_across_restarts() -> Result<()> {
        let (mut source, seen) = recording_source()?;
        source.start(device("stub://back", LensPosition::Back)?, 200)?;
        wait_for(&seen, 2);
        source.stop();
        let before = seen.lock().unwrap().len();
        source.start(device("stub://back", LensPosition::Back)?, 200)?;
        wait_for(&seen, before + 2);
        source.stop();

        let seen = seen.lock().unwrap();
        for pair in seen.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
        assert!(seen.first().map(|s| s.3) < seen.last().map(|s| s.3));
        Ok(())
    }

    #[test]
    fn capture_errors_are_counted_and_capture_continues() -> Result<()> {
        let (mut source, seen) = recording_source()?;
        let mut cam = SyntheticCamera::new(DeviceDescriptor::new("stub://back", LensPosition::Back))
            .failing_every(2);
        cam.open()?;
        cam.configure(&CaptureSettings {
            width: 4,
            height: 4,
            target_fps: 200,
        })?;
        source.start(Box::new(cam), 200)?;
        wait_for(&seen, 5);
        let stats = source.stats();
        source.stop();

        assert!(seen.lock().unwrap().len() >= 5);
        assert!(stats.capture_errors > 0);
        assert!(stats.frames_captured >= 5);
        assert_eq!(stats.device.as_deref(), Some("stub://back"));
        assert!(source.stats().device.is_none());
        Ok(())
    }

    #[test]
    fn panicking_device_does_not_end_capture() -> Result<()> {
        let (mut source, seen) = recording_source()?;
        let mut cam = SyntheticCamera::new(DeviceDescriptor::new("stub://back", LensPosition::Back))
            .panicking_at(3);
        cam.open()?;
        cam.configure(&CaptureSettings {
            width: 4,
            height: 4,
            target_fps: 200,
        })?;
        source.start(Box::new(cam), 200)?;
        wait_for(&seen, 6);
        assert!(source.is_running());
        let stats = source.stats();
        source.stop();

        assert!(seen.lock().unwrap().len() >= 6);
        assert_eq!(stats.capture_errors, 1);
        Ok(())
    }

    #[test]
    fn switch_requires_running_source() -> Result<()> {
        let (mut source, _seen) = recording_source()?;
        assert!(source
            .switch_device(device("stub://front", LensPosition::Front)?)
            .is_err());
        Ok(())
    }
}
