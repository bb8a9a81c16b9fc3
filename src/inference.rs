//! Inference stage: detector → filter → normalize → track → publish.
//!
//! Runs on the inference lane, which guarantees at most one detector call in
//! flight. Frames that arrive while a call is running were already skipped by
//! the lane, so this stage only ever sees the freshest frame it could take.
//!
//! The inference stage is responsible for:
//! - Discarding work that belongs to a stopped session generation
//! - Dropping malformed and low-confidence detections
//! - Converting boxes to display space before anything downstream sees them
//!
//! The inference stage MUST NOT:
//! - Publish results after the session that produced them has stopped
//! - Retry a failed detector call

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::detect::{Detection, DetectionBatch, Detector};
use crate::frame::Frame;
use crate::hub::{DetectionFeed, DistributionHub, PublishOutcome};
use crate::ingest::SessionGate;
use crate::lane::FrameHandler;
use crate::normalize;
use crate::track::Tracker;

/// Log every Nth detector failure after the first.
const FAILURE_LOG_EVERY: u64 = 100;

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    below_confidence: AtomicU64,
    malformed: AtomicU64,
    rejected_labels: AtomicU64,
    published: AtomicU64,
    superseded: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InferenceStats {
    /// Frames handed to the detector.
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Frames or results dropped because their session generation ended.
    pub discarded: u64,
    pub below_confidence: u64,
    pub malformed: u64,
    /// Detector observations whose class was not recognized.
    pub rejected_labels: u64,
    pub published: u64,
    /// Results the hub refused because a newer feed was already out.
    pub superseded: u64,
}

/// Read side of the stage counters, usable after the stage moved into its lane.
#[derive(Clone)]
pub struct InferenceStatsHandle(Arc<Counters>);

impl InferenceStatsHandle {
    pub fn snapshot(&self) -> InferenceStats {
        let c = &self.0;
        InferenceStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            below_confidence: c.below_confidence.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            rejected_labels: c.rejected_labels.load(Ordering::Relaxed),
            published: c.published.load(Ordering::Relaxed),
            superseded: c.superseded.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InferenceOutcome {
    Published,
    Discarded,
    Failed,
    Superseded,
}

pub struct InferenceStage {
    detector: Box<dyn Detector>,
    tracker: Option<Tracker>,
    hub: Arc<DistributionHub>,
    gate: Arc<SessionGate>,
    min_confidence: f32,
    counters: Arc<Counters>,
    warmed_up: bool,
    tracked_generation: u64,
}

impl InferenceStage {
    pub fn new(
        detector: Box<dyn Detector>,
        hub: Arc<DistributionHub>,
        gate: Arc<SessionGate>,
    ) -> Self {
        Self {
            detector,
            tracker: None,
            hub,
            gate,
            min_confidence: 0.0,
            counters: Arc::new(Counters::default()),
            warmed_up: false,
            tracked_generation: 0,
        }
    }

    pub fn with_tracker(mut self, tracker: Tracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn stats_handle(&self) -> InferenceStatsHandle {
        InferenceStatsHandle(Arc::clone(&self.counters))
    }

    /// Run one frame through the stage.
    pub fn process(&mut self, frame: &Frame) -> InferenceOutcome {
        let generation = frame.generation();
        if !self.gate.admits(generation) {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return InferenceOutcome::Discarded;
        }

        if !self.warmed_up {
            self.warmed_up = true;
            if let Err(err) = self.detector.warm_up() {
                log::warn!(
                    "InferenceStage: {} warm-up failed: {:#}",
                    self.detector.name(),
                    err
                );
            }
        }

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let raw = match self.detector.infer(&frame.view()) {
            Ok(raw) => raw,
            Err(err) => {
                let failed = self.counters.failed.fetch_add(1, Ordering::Relaxed) + 1;
                if failed == 1 || failed % FAILURE_LOG_EVERY == 0 {
                    log::warn!(
                        "InferenceStage: {} failed on frame {} ({} failures): {:#}",
                        self.detector.name(),
                        frame.sequence,
                        failed,
                        err
                    );
                }
                return InferenceOutcome::Failed;
            }
        };
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .rejected_labels
            .store(self.detector.rejected_labels(), Ordering::Relaxed);

        let mut detections = Vec::with_capacity(raw.len());
        for r in raw {
            if !r.is_well_formed() {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if r.confidence < self.min_confidence {
                self.counters.below_confidence.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let bbox = normalize::to_display(r.bbox, frame.orientation);
            detections.push(Detection::new(r.label, r.confidence, bbox, frame.timestamp));
        }

        let tracks = match self.tracker.as_mut() {
            Some(tracker) => {
                if self.tracked_generation != generation {
                    tracker.clear();
                    self.tracked_generation = generation;
                }
                let update = tracker.update(&detections, frame.timestamp);
                detections = detections
                    .into_iter()
                    .zip(update.assignments)
                    .map(|(detection, id)| {
                        let team = tracker.get(id).and_then(|t| t.team());
                        detection.with_track(id, team)
                    })
                    .collect();
                tracker.snapshots()
            }
            None => Vec::new(),
        };

        let mut batch = DetectionBatch::new(frame.timestamp, frame.sequence, frame.orientation);
        batch.detections = detections;
        let feed = DetectionFeed { batch, tracks };
        let gate = Arc::clone(&self.gate);
        match self
            .hub
            .publish_detections_if(feed, || gate.admits(generation))
        {
            PublishOutcome::Published => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                InferenceOutcome::Published
            }
            PublishOutcome::Refused => {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                log::debug!(
                    "InferenceStage: discarded result for frame {} after stop",
                    frame.sequence
                );
                InferenceOutcome::Discarded
            }
            PublishOutcome::Stale => {
                self.counters.superseded.fetch_add(1, Ordering::Relaxed);
                InferenceOutcome::Superseded
            }
        }
    }
}

impl FrameHandler for InferenceStage {
    fn handle(&mut self, frame: &Frame) {
        self.process(frame);
    }
}
