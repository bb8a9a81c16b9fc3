//! Captured frames and their orientation metadata.
//!
//! - `RawImage`: what a capture device hands over (pixels + dimensions + format).
//! - `Frame`: one capture instant. Pixel bytes are private and read-only once stamped.
//! - `FrameView`: restricted view handed to detectors.
//! - `Orientation`: rotation + mirroring in effect when the frame was captured.
//!
//! Frames are shared as `Arc<Frame>` between the preview and inference lanes and
//! released as soon as both are done with them. Nothing in the crate keeps a
//! history of frames.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::time::Duration;

// ----------------------------------------------------------------------------
// Pixel layout
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PixelFormat {
    Rgb24,
    Bgra32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Bgra32 => 4,
        }
    }

    pub fn expected_len(self, width: u32, height: u32) -> Result<usize> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(self.bytes_per_pixel()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))
    }
}

/// Image as produced by a capture device, before the source stamps it.
#[derive(Clone, Debug)]
pub struct RawImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl RawImage {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = format.expected_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                format,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            format,
        })
    }
}

// ----------------------------------------------------------------------------
// Orientation
// ----------------------------------------------------------------------------

/// Physical orientation reported by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DeviceOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
    FaceUp,
    FaceDown,
    Unknown,
}

/// Rotation applied to captured video relative to the display.
///
/// `LandscapeLeft` turns content 90 degrees clockwise, `LandscapeRight`
/// 90 degrees counter-clockwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Rotation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Portrait,
        Rotation::PortraitUpsideDown,
        Rotation::LandscapeLeft,
        Rotation::LandscapeRight,
    ];

    /// Video rotation for a device orientation.
    ///
    /// The capture sensor is mounted opposite to the screen, so the landscape
    /// cases swap. Flat and unknown orientations keep portrait.
    pub fn for_device(orientation: DeviceOrientation) -> Self {
        match orientation {
            DeviceOrientation::Portrait => Rotation::Portrait,
            DeviceOrientation::PortraitUpsideDown => Rotation::PortraitUpsideDown,
            DeviceOrientation::LandscapeLeft => Rotation::LandscapeRight,
            DeviceOrientation::LandscapeRight => Rotation::LandscapeLeft,
            DeviceOrientation::FaceUp | DeviceOrientation::FaceDown | DeviceOrientation::Unknown => {
                Rotation::Portrait
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Orientation {
    pub rotation: Rotation,
    /// Horizontal mirroring, set for front-facing devices.
    pub mirrored: bool,
}

impl Orientation {
    pub const fn new(rotation: Rotation, mirrored: bool) -> Self {
        Self { rotation, mirrored }
    }

    /// Every rotation, plain and mirrored.
    pub fn all() -> impl Iterator<Item = Orientation> {
        Rotation::ALL
            .into_iter()
            .flat_map(|r| [Orientation::new(r, false), Orientation::new(r, true)])
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One capture instant.
///
/// There is no `Clone`: frames are shared by `Arc` and never copied.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Offset from the frame source clock origin. Monotonic across restarts.
    pub timestamp: Duration,
    pub orientation: Orientation,
    pub sequence: u64,
    pub(crate) generation: u64,
}

impl Frame {
    pub fn new(image: RawImage, timestamp: Duration, orientation: Orientation) -> Self {
        Self {
            pixels: image.pixels,
            width: image.width,
            height: image.height,
            format: image.format,
            timestamp,
            orientation,
            sequence: 0,
            generation: 0,
        }
    }

    pub(crate) fn stamped(mut self, sequence: u64, generation: u64) -> Self {
        self.sequence = sequence;
        self.generation = generation;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }

    pub(crate) fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("timestamp", &self.timestamp)
            .field("orientation", &self.orientation)
            .field("sequence", &self.sequence)
            .field("pixels", &format_args!("<{} bytes>", self.pixels.len()))
            .finish()
    }
}

/// Read-only view of a frame for detectors.
///
/// The slice borrowed from `pixels()` cannot outlive the `infer` call.
pub struct FrameView<'a> {
    frame: &'a Frame,
}

impl<'a> FrameView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn format(&self) -> PixelFormat {
        self.frame.format
    }

    pub fn timestamp(&self) -> Duration {
        self.frame.timestamp
    }

    pub fn orientation(&self) -> Orientation {
        self.frame.orientation
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }

    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_image_validates_length() {
        assert!(RawImage::new(vec![0u8; 12], 2, 2, PixelFormat::Rgb24).is_ok());
        assert!(RawImage::new(vec![0u8; 12], 2, 2, PixelFormat::Bgra32).is_err());
    }

    #[test]
    fn landscape_device_orientations_swap_for_capture() {
        assert_eq!(
            Rotation::for_device(DeviceOrientation::LandscapeLeft),
            Rotation::LandscapeRight
        );
        assert_eq!(
            Rotation::for_device(DeviceOrientation::LandscapeRight),
            Rotation::LandscapeLeft
        );
        assert_eq!(
            Rotation::for_device(DeviceOrientation::FaceUp),
            Rotation::Portrait
        );
    }

    #[test]
    fn orientation_enumeration_covers_mirrored_variants() {
        let all: Vec<_> = Orientation::all().collect();
        assert_eq!(all.len(), 8);
        assert_eq!(all.iter().filter(|o| o.mirrored).count(), 4);
    }

    #[test]
    fn view_exposes_metadata() -> Result<()> {
        let image = RawImage::new(vec![7u8; 12], 2, 2, PixelFormat::Rgb24)?;
        let frame = Frame::new(image, Duration::from_millis(40), Orientation::default())
            .stamped(3, 1);
        let view = frame.view();
        assert_eq!(view.width(), 2);
        assert_eq!(view.sequence(), 3);
        assert_eq!(view.timestamp(), Duration::from_millis(40));
        assert_eq!(view.pixels().len(), 12);
        Ok(())
    }
}
