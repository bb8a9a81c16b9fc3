//! Capture devices and the frame source that drives them.
//!
//! This module provides:
//! - `CaptureDevice`: one camera, opened and configured by the session
//! - Synthetic cameras for `stub://` selectors (testing, demos)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - `FrameSource`: the capture loop that stamps frames and fans them out
//!
//! The ingestion layer is responsible for:
//! - Stamping every frame with a monotonic timestamp and the current orientation
//! - Pacing capture to the configured frame rate
//! - Handing each frame to the preview and inference lanes without waiting on either
//!
//! The ingestion layer MUST NOT:
//! - Queue frames for a busy consumer
//! - Store frames to disk or keep frame history
//! - Log frame content

pub mod convert;
mod source;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;
use serde::Serialize;

pub use source::{FrameHandlers, FrameSource, FrameSourceStats, SessionGate, SourceMonitor};
pub use synthetic::SyntheticCamera;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;

pub const STUB_PREFIX: &str = "stub://";

/// Which way a device faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LensPosition {
    Back,
    Front,
    External,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Selector used to open the device (`/dev/video0`, `stub://back`, ...).
    pub selector: String,
    pub position: LensPosition,
}

impl DeviceDescriptor {
    pub fn new(selector: impl Into<String>, position: LensPosition) -> Self {
        Self {
            selector: selector.into(),
            position,
        }
    }

    /// Front-facing devices are shown mirrored.
    pub fn is_mirrored(&self) -> bool {
        self.position == LensPosition::Front
    }
}

/// Capture parameters applied when a session configures a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            target_fps: 30,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DeviceStats {
    pub frames_captured: u64,
    pub capture_errors: u64,
    pub device: String,
}

/// A camera the session can own.
///
/// `open` acquires the device, `configure` applies settings. Both happen on
/// the session thread; `next_image` runs on the capture thread afterwards.
pub trait CaptureDevice: Send {
    fn descriptor(&self) -> &DeviceDescriptor;

    fn open(&mut self) -> Result<()>;

    fn configure(&mut self, settings: &CaptureSettings) -> Result<()>;

    /// Block until the next image is available.
    fn next_image(&mut self) -> Result<crate::frame::RawImage>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> DeviceStats;
}

/// Position implied by a selector.
pub fn lens_position(selector: &str) -> LensPosition {
    match selector.strip_prefix(STUB_PREFIX) {
        Some("back") => LensPosition::Back,
        Some("front") => LensPosition::Front,
        _ => LensPosition::External,
    }
}

/// Create the device behind a selector. Nothing is acquired until `open`.
pub fn resolve_device(selector: &str) -> Result<Box<dyn CaptureDevice>> {
    let descriptor = DeviceDescriptor::new(selector, lens_position(selector));
    if selector.starts_with(STUB_PREFIX) {
        return Ok(Box::new(SyntheticCamera::new(descriptor)));
    }
    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Camera::new(descriptor)))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        Err(anyhow::anyhow!(
            "no capture backend for {} (build with feature ingest-v4l2)",
            selector
        ))
    }
}

/// Devices this build can capture from.
pub fn available_devices() -> Vec<DeviceDescriptor> {
    #[allow(unused_mut)]
    let mut devices = vec![
        DeviceDescriptor::new("stub://back", LensPosition::Back),
        DeviceDescriptor::new("stub://front", LensPosition::Front),
    ];
    #[cfg(feature = "ingest-v4l2")]
    devices.extend(v4l2::discover());
    devices
}

/// Preferred device: back-facing first, then external, then anything.
pub fn default_device(devices: &[DeviceDescriptor]) -> Option<&DeviceDescriptor> {
    [LensPosition::Back, LensPosition::External, LensPosition::Front]
        .iter()
        .find_map(|position| devices.iter().find(|d| d.position == *position))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_selectors_map_to_positions() {
        assert_eq!(lens_position("stub://back"), LensPosition::Back);
        assert_eq!(lens_position("stub://front"), LensPosition::Front);
        assert_eq!(lens_position("stub://test"), LensPosition::External);
        assert_eq!(lens_position("/dev/video0"), LensPosition::External);
    }

    #[test]
    fn default_device_prefers_back() {
        let devices = vec![
            DeviceDescriptor::new("stub://front", LensPosition::Front),
            DeviceDescriptor::new("/dev/video0", LensPosition::External),
            DeviceDescriptor::new("stub://back", LensPosition::Back),
        ];
        assert_eq!(
            default_device(&devices).map(|d| d.selector.as_str()),
            Some("stub://back")
        );
        assert_eq!(
            default_device(&devices[..1]).map(|d| d.selector.as_str()),
            Some("stub://front")
        );
        assert!(default_device(&[]).is_none());
    }

    #[test]
    fn stub_selector_resolves_to_synthetic_camera() -> Result<()> {
        let device = resolve_device("stub://front")?;
        assert!(device.descriptor().is_mirrored());
        Ok(())
    }
}
