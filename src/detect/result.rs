use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::frame::Orientation;
use crate::geometry::BoundingBox;

/// Object classes the pipeline understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Player,
    Ball,
    Referee,
    Goalpost,
}

impl Label {
    pub fn as_str(self) -> &'static str {
        match self {
            Label::Player => "player",
            Label::Ball => "ball",
            Label::Referee => "referee",
            Label::Goalpost => "goalpost",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamSide {
    Home,
    Away,
    Neutral,
}

/// Detector output for one object, in model space (origin bottom-left).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub label: Label,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(label: Label, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label,
            confidence,
            bbox,
        }
    }

    /// Finite box and a confidence inside `[0,1]`.
    pub fn is_well_formed(&self) -> bool {
        self.bbox.is_finite()
            && self.bbox.w >= 0.0
            && self.bbox.h >= 0.0
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// A detection in display space (origin top-left), ready for rendering.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub id: Uuid,
    pub label: Label,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub team: Option<TeamSide>,
    pub track_id: Option<u64>,
    pub timestamp: Duration,
}

impl Detection {
    pub fn new(label: Label, confidence: f32, bbox: BoundingBox, timestamp: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            label,
            confidence,
            bbox,
            team: None,
            track_id: None,
            timestamp,
        }
    }

    pub fn with_track(mut self, track_id: u64, team: Option<TeamSide>) -> Self {
        self.track_id = Some(track_id);
        self.team = team;
        self
    }
}

/// All detections produced for one processed frame.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DetectionBatch {
    pub timestamp: Duration,
    pub sequence: u64,
    pub orientation: Orientation,
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn new(timestamp: Duration, sequence: u64, orientation: Orientation) -> Self {
        Self {
            timestamp,
            sequence,
            orientation,
            detections: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
