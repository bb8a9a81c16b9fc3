use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::labels::LabelMap;
use crate::detect::result::RawDetection;
use crate::frame::FrameView;
use crate::geometry::BoundingBox;

/// One object as reported by a model runtime, before class decoding.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelObservation {
    /// Class id or class name exactly as the model reports it.
    pub identifier: String,
    pub confidence: f32,
    /// Model space box (unit square, origin bottom-left).
    pub bbox: BoundingBox,
}

impl ModelObservation {
    pub fn new(identifier: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            identifier: identifier.into(),
            confidence,
            bbox,
        }
    }
}

/// Adapts a model runtime closure into a [`Detector`].
///
/// Observations whose class is not in the label map are dropped and counted.
pub struct ModelDetector<F> {
    name: &'static str,
    labels: LabelMap,
    run: F,
    rejected: u64,
}

impl<F> ModelDetector<F>
where
    F: FnMut(&FrameView<'_>) -> Result<Vec<ModelObservation>> + Send,
{
    pub fn new(name: &'static str, labels: LabelMap, run: F) -> Self {
        Self {
            name,
            labels,
            run,
            rejected: 0,
        }
    }
}

impl<F> Detector for ModelDetector<F>
where
    F: FnMut(&FrameView<'_>) -> Result<Vec<ModelObservation>> + Send,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn infer(&mut self, frame: &FrameView<'_>) -> Result<Vec<RawDetection>> {
        let observations = (self.run)(frame)?;
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

/// Decode observations in order, skipping (and counting) unknown classes.
pub(crate) fn decode_observations(
    labels: &LabelMap,
    observations: Vec<ModelObservation>,
    rejected: &mut u64,
) -> Vec<RawDetection> {
    let mut detections = Vec::with_capacity(observations.len());
    for obs in observations {
        match labels.decode(&obs.identifier) {
            Ok(label) => detections.push(RawDetection::new(label, obs.confidence, obs.bbox)),
            Err(err) => {
                *rejected += 1;
                log::debug!("ModelDetector: dropping observation: {}", err);
            }
        }
    }
    detections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Label;
    use crate::frame::{Frame, Orientation, PixelFormat, RawImage};
    use std::time::Duration;

    fn frame() -> Result<Frame> {
        let image = RawImage::new(vec![0u8; 12], 2, 2, PixelFormat::Rgb24)?;
        Ok(Frame::new(image, Duration::ZERO, Orientation::default()))
    }

    #[test]
    fn unknown_classes_are_counted_not_reclassified() -> Result<()> {
        let mut detector = ModelDetector::new("test-model", LabelMap::default(), |_view| {
            Ok(vec![
                ModelObservation::new("0", 0.9, BoundingBox::new(0.1, 0.1, 0.05, 0.05)),
                ModelObservation::new("9", 0.8, BoundingBox::new(0.2, 0.2, 0.1, 0.2)),
                ModelObservation::new("referee", 0.7, BoundingBox::new(0.4, 0.4, 0.1, 0.2)),
            ])
        });
        let frame = frame()?;
        let detections = detector.infer(&frame.view())?;
        let labels: Vec<Label> = detections.iter().map(|d| d.label).collect();
        assert_eq!(labels, vec![Label::Ball, Label::Referee]);
        assert_eq!(detector.rejected_labels(), 1);
        Ok(())
    }

    #[test]
    fn runtime_errors_propagate() -> Result<()> {
        let mut detector = ModelDetector::new("broken", LabelMap::default(), |_view| {
            Err(anyhow::anyhow!("model session lost"))
        });
        let frame = frame()?;
        assert!(detector.infer(&frame.view()).is_err());
        Ok(())
    }
}
