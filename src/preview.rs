//! Preview lane handler: decode frames into RGB images for display.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;

use crate::frame::{Frame, PixelFormat};
use crate::hub::{DistributionHub, Preview};
use crate::ingest::convert::bgra_to_rgb;
use crate::ingest::SessionGate;
use crate::lane::FrameHandler;

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    paused: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PreviewStats {
    pub published: u64,
    /// Frames skipped while the preview was paused.
    pub paused: u64,
    pub discarded: u64,
    pub failed: u64,
}

/// Pause switch and counters, shared with the stage after it moved into its lane.
#[derive(Clone)]
pub struct PreviewControls {
    paused: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl PreviewControls {
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PreviewStats {
        let c = &self.counters;
        PreviewStats {
            published: c.published.load(Ordering::Relaxed),
            paused: c.paused.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct PreviewStage {
    hub: Arc<DistributionHub>,
    gate: Arc<SessionGate>,
    /// Zero keeps the capture width.
    max_width: u32,
    controls: PreviewControls,
}

impl PreviewStage {
    pub fn new(hub: Arc<DistributionHub>, gate: Arc<SessionGate>, max_width: u32) -> Self {
        Self {
            hub,
            gate,
            max_width,
            controls: PreviewControls {
                paused: Arc::new(AtomicBool::new(false)),
                counters: Arc::new(Counters::default()),
            },
        }
    }

    pub fn controls(&self) -> PreviewControls {
        self.controls.clone()
    }
}

impl FrameHandler for PreviewStage {
    fn handle(&mut self, frame: &Frame) {
        let counters = &self.controls.counters;
        if self.controls.is_paused() {
            counters.paused.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if !self.gate.admits(frame.generation()) {
            counters.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match render(frame, self.max_width) {
            Ok(image) => {
                let preview = Preview {
                    timestamp: frame.timestamp,
                    sequence: frame.sequence,
                    orientation: frame.orientation,
                    image,
                };
                let generation = frame.generation();
                let gate = &self.gate;
                if self.hub.publish_preview_if(preview, || gate.admits(generation)) {
                    counters.published.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.discarded.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                let failed = counters.failed.fetch_add(1, Ordering::Relaxed) + 1;
                if failed == 1 {
                    log::warn!("PreviewStage: frame {} not rendered: {:#}", frame.sequence, err);
                }
            }
        }
    }
}

/// Decode a frame into RGB, shrinking it to `max_width` if wider.
pub fn render(frame: &Frame, max_width: u32) -> Result<RgbImage> {
    let rgb = match frame.format {
        PixelFormat::Rgb24 => frame.pixels().to_vec(),
        PixelFormat::Bgra32 => bgra_to_rgb(frame.pixels()),
    };
    let image = RgbImage::from_raw(frame.width, frame.height, rgb)
        .ok_or_else(|| anyhow!("{}x{} buffer too small", frame.width, frame.height))?;
    if max_width == 0 || image.width() <= max_width {
        return Ok(image);
    }
    let height = ((image.height() as u64 * max_width as u64) / image.width() as u64).max(1) as u32;
    Ok(imageops::resize(&image, max_width, height, FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Orientation, RawImage};
    use std::time::Duration;

    fn bgra_frame(width: u32, height: u32, generation: u64) -> Result<Frame> {
        let pixels = [10u8, 20, 30, 255].repeat((width * height) as usize);
        let image = RawImage::new(pixels, width, height, PixelFormat::Bgra32)?;
        Ok(Frame::new(image, Duration::from_millis(5), Orientation::default()).stamped(1, generation))
    }

    #[test]
    fn bgra_frames_render_as_rgb() -> Result<()> {
        let image = render(&bgra_frame(2, 2, 1)?, 0)?;
        assert_eq!(image.get_pixel(1, 1).0, [30, 20, 10]);
        Ok(())
    }

    #[test]
    fn wide_frames_are_downscaled() -> Result<()> {
        let image = render(&bgra_frame(64, 32, 1)?, 16)?;
        assert_eq!(image.dimensions(), (16, 8));
        Ok(())
    }

    #[test]
    fn paused_preview_publishes_nothing() -> Result<()> {
        let hub = Arc::new(DistributionHub::new());
        let gate = Arc::new(SessionGate::new());
        let generation = gate.open();
        let mut stage = PreviewStage::new(Arc::clone(&hub), gate, 0);
        let controls = stage.controls();

        controls.set_paused(true);
        stage.handle(&bgra_frame(2, 2, generation)?);
        assert!(hub.latest_preview().is_none());

        controls.set_paused(false);
        stage.handle(&bgra_frame(2, 2, generation)?);
        assert!(hub.latest_preview().is_some());
        let stats = controls.stats();
        assert_eq!((stats.paused, stats.published), (1, 1));
        Ok(())
    }

    #[test]
    fn frames_from_a_stopped_session_are_not_published() -> Result<()> {
        let hub = Arc::new(DistributionHub::new());
        let gate = Arc::new(SessionGate::new());
        let generation = gate.open();
        let mut stage = PreviewStage::new(Arc::clone(&hub), Arc::clone(&gate), 0);
        let controls = stage.controls();

        gate.close();
        stage.handle(&bgra_frame(2, 2, generation)?);
        assert!(hub.latest_preview().is_none());
        assert_eq!(controls.stats().discarded, 1);
        Ok(())
    }
}
