use anyhow::Result;

use super::result::RawDetection;
use crate::frame::FrameView;

/// Object detector invoked once per processed frame.
///
/// Calls are synchronous and may take longer than a frame interval. The
/// inference worker owns its detector outright, so no lock is held across
/// `infer` and there is never more than one call in flight.
pub trait Detector: Send {
    /// Detector identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. Boxes are returned in model space
    /// (unit square, origin bottom-left).
    ///
    /// Implementations must treat the pixel slice as read-only and must not
    /// keep it past the call.
    fn infer(&mut self, frame: &FrameView<'_>) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, run on the worker before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Observations dropped so far because their class was not recognized.
    fn rejected_labels(&self) -> u64 {
        0
    }
}
