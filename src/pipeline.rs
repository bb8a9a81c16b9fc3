//! Pipeline assembly.
//!
//! Wires frame source, preview and inference lanes, tracker, hub and session
//! from a `PipelineConfig`. Binaries and integration tests go through here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::authorization::{self, AuthorizationProvider};
use crate::config::PipelineConfig;
use crate::detect::{Detector, DetectorRegistry};
use crate::frame::DeviceOrientation;
use crate::hub::DistributionHub;
use crate::inference::{InferenceStage, InferenceStats, InferenceStatsHandle};
use crate::ingest::{FrameHandlers, FrameSource, FrameSourceStats, SessionGate, SourceMonitor};
use crate::preview::{PreviewControls, PreviewStage, PreviewStats};
use crate::session::{CameraSessionState, DeviceOpener, SessionController, SessionError};
use crate::track::{PitchHalfAssigner, Tracker};

/// Point-in-time counters for the whole pipeline.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineStats {
    pub session: CameraSessionState,
    pub detector: &'static str,
    pub source: FrameSourceStats,
    pub preview: PreviewStats,
    pub inference: InferenceStats,
    /// Detection feeds refused because they were older than the published one.
    pub stale_feeds_rejected: u64,
}

pub struct Pipeline {
    session: SessionController,
    monitor: SourceMonitor,
    hub: Arc<DistributionHub>,
    preview: PreviewControls,
    inference: InferenceStatsHandle,
    detector_name: &'static str,
}

impl Pipeline {
    /// Build from config, creating the detector by name and the
    /// authorization provider from the configured mode.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let registry = DetectorRegistry::with_builtin();
        let detector = registry.create(&config.inference.detector)?;
        let auth = authorization::provider_for(config.authorization, &config.capture.device);
        Self::new(config, detector, auth)
    }

    pub fn new(
        config: &PipelineConfig,
        detector: Box<dyn Detector>,
        auth: Arc<dyn AuthorizationProvider>,
    ) -> Result<Self> {
        let hub = Arc::new(DistributionHub::new());
        let gate = Arc::new(SessionGate::new());
        let detector_name = detector.name();

        let preview = PreviewStage::new(
            Arc::clone(&hub),
            Arc::clone(&gate),
            config.preview.max_width,
        );
        let preview_controls = preview.controls();

        let mut inference = InferenceStage::new(detector, Arc::clone(&hub), Arc::clone(&gate))
            .with_min_confidence(config.inference.min_confidence);
        if config.tracking.enabled {
            let tracker = Tracker::new(config.tracker_config()).with_team_assigner(Box::new(
                PitchHalfAssigner::new(config.tracking.home_on_left),
            ));
            inference = inference.with_tracker(tracker);
        }
        let inference_stats = inference.stats_handle();

        let source = FrameSource::new(
            FrameHandlers {
                preview: Box::new(preview),
                inference: Box::new(inference),
            },
            gate,
        )?;
        let monitor = source.monitor();
        let session = SessionController::new(
            source,
            auth,
            config.capture_settings(),
            config.capture.device.clone(),
        );

        log::info!(
            "Pipeline: detector={} device={} tracking={}",
            detector_name,
            config.capture.device,
            config.tracking.enabled
        );
        Ok(Self {
            session,
            monitor,
            hub,
            preview: preview_controls,
            inference: inference_stats,
            detector_name,
        })
    }

    pub fn with_device_opener(mut self, opener: DeviceOpener) -> Self {
        self.session = self.session.with_device_opener(opener);
        self
    }

    pub fn start(&self) -> Result<(), SessionError> {
        self.session.start()
    }

    pub fn stop(&self) {
        self.session.stop();
    }

    pub fn switch_device(&self, selector: &str) -> Result<(), SessionError> {
        self.session.switch_device(selector)
    }

    pub fn set_orientation(&self, orientation: DeviceOrientation) {
        self.session.set_orientation(orientation);
    }

    /// Stop or resume preview publication. Inference is unaffected.
    pub fn set_preview_paused(&self, paused: bool) {
        self.preview.set_paused(paused);
    }

    pub fn reset_authorization(&self) {
        self.session.reset_authorization();
    }

    pub fn hub(&self) -> &Arc<DistributionHub> {
        &self.hub
    }

    pub fn session_state(&self) -> CameraSessionState {
        self.session.state()
    }

    /// Wait until both lanes are idle. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.monitor.wait_idle(timeout)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            session: self.session.state(),
            detector: self.detector_name,
            source: self.monitor.stats(),
            preview: self.preview.stats(),
            inference: self.inference.snapshot(),
            stale_feeds_rejected: self.hub.stale_rejected(),
        }
    }
}
