use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::RawDetection;
use crate::frame::FrameView;

/// Detector that never finds anything. Useful for preview-only deployments.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn name(&self) -> &'static str {
        "null"
    }

    fn infer(&mut self, _frame: &FrameView<'_>) -> Result<Vec<RawDetection>> {
        Ok(Vec::new())
    }
}
