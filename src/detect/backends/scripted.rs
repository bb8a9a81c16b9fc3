use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::detect::backend::Detector;
use crate::detect::result::RawDetection;
use crate::frame::FrameView;

/// Outcome of one scripted `infer` call.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Detections(Vec<RawDetection>),
    Fail(String),
}

/// Detector that replays a fixed script, one step per call.
///
/// Once the script runs out every call returns the fallback (empty by
/// default). Latency is simulated with a sleep inside `infer`.
pub struct ScriptedDetector {
    steps: VecDeque<ScriptStep>,
    fallback: Vec<RawDetection>,
    latency: Duration,
    calls: Arc<AtomicU64>,
}

impl ScriptedDetector {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            fallback: Vec::new(),
            latency: Duration::ZERO,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Same detections on every call.
    pub fn repeating(detections: Vec<RawDetection>) -> Self {
        let mut detector = Self::new(Vec::new());
        detector.fallback = detections;
        detector
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Shared call counter, readable after the detector has been moved into a pipeline.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.calls)
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, _frame: &FrameView<'_>) -> Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        match self.steps.pop_front() {
            Some(ScriptStep::Detections(d)) => Ok(d),
            Some(ScriptStep::Fail(msg)) => Err(anyhow!(msg)),
            None => Ok(self.fallback.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Label;
    use crate::frame::{Frame, Orientation, PixelFormat, RawImage};
    use crate::geometry::BoundingBox;

    #[test]
    fn replays_steps_then_falls_back() -> Result<()> {
        let ball = RawDetection::new(Label::Ball, 0.9, BoundingBox::new(0.1, 0.1, 0.1, 0.1));
        let mut detector = ScriptedDetector::new(vec![
            ScriptStep::Detections(vec![ball]),
            ScriptStep::Fail("timeout".into()),
        ]);
        let calls = detector.call_counter();
        let image = RawImage::new(vec![0u8; 3], 1, 1, PixelFormat::Rgb24)?;
        let frame = Frame::new(image, Duration::ZERO, Orientation::default());

        assert_eq!(detector.infer(&frame.view())?, vec![ball]);
        assert!(detector.infer(&frame.view()).is_err());
        assert!(detector.infer(&frame.view())?.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        Ok(())
    }
}
