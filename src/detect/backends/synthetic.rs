//! Deterministic match scene for demos and end-to-end tests.
//!
//! Positions are a function of the frame timestamp, so tracking sees smooth
//! motion regardless of frame rate. Output goes through the same class-id
//! decoding as a real model.

use anyhow::Result;
use rand::Rng;

use super::model::{decode_observations, ModelObservation};
use crate::detect::backend::Detector;
use crate::detect::labels::LabelMap;
use crate::detect::result::RawDetection;
use crate::frame::FrameView;
use crate::geometry::BoundingBox;

const BALL_SIZE: f32 = 0.03;
const PLAYER_W: f32 = 0.05;
const PLAYER_H: f32 = 0.12;
/// Every Nth frame the ball is hidden behind a player.
const OCCLUSION_PERIOD: u64 = 45;

pub struct SyntheticDetector {
    labels: LabelMap,
    jitter: f32,
    rejected: u64,
}

impl SyntheticDetector {
    pub fn new() -> Self {
        Self {
            labels: LabelMap::default(),
            jitter: 0.002,
            rejected: 0,
        }
    }

    /// Disable positional noise. Used where exact boxes are asserted.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    fn observe(&self, t: f32, sequence: u64) -> Vec<ModelObservation> {
        let mut rng = rand::thread_rng();
        let mut noise = || {
            if self.jitter > 0.0 {
                rng.gen_range(-self.jitter..self.jitter)
            } else {
                0.0
            }
        };

        let mut out = Vec::with_capacity(6);
        if sequence % OCCLUSION_PERIOD != OCCLUSION_PERIOD - 1 {
            let (bx, by) = (0.5 + 0.3 * t.cos(), 0.5 + 0.2 * (t * 1.3).sin());
            out.push(ModelObservation::new(
                "0",
                0.82,
                boxed(bx + noise(), by + noise(), BALL_SIZE, BALL_SIZE),
            ));
        }

        // Two players per half drifting along the touchline axis.
        let sway = 0.05 * (t * 0.5).sin();
        for (i, x) in [0.2_f32, 0.32, 0.68, 0.8].into_iter().enumerate() {
            let y = 0.3 + 0.15 * i as f32 + sway;
            out.push(ModelObservation::new(
                "2",
                0.9,
                boxed(x + noise(), y + noise(), PLAYER_W, PLAYER_H),
            ));
        }

        out.push(ModelObservation::new(
            "3",
            0.76,
            boxed(0.5 + sway + noise(), 0.55 + noise(), PLAYER_W, PLAYER_H),
        ));
        out
    }
}

impl Default for SyntheticDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn boxed(cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
    BoundingBox::new(cx - w / 2.0, cy - h / 2.0, w, h).clamped()
}

impl Detector for SyntheticDetector {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn infer(&mut self, frame: &FrameView<'_>) -> Result<Vec<RawDetection>> {
        let t = frame.timestamp().as_secs_f32();
        let observations = self.observe(t, frame.sequence());
        Ok(decode_observations(
            &self.labels,
            observations,
            &mut self.rejected,
        ))
    }

    fn rejected_labels(&self) -> u64 {
        self.rejected
    }
}
