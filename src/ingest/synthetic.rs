use anyhow::{anyhow, Context, Result};

use super::{CaptureDevice, CaptureSettings, DeviceDescriptor, DeviceStats};
use crate::frame::{PixelFormat, RawImage};

/// Camera that renders a moving gradient, used for `stub://` selectors.
///
/// Fault switches let tests exercise every failure a real device can produce.
pub struct SyntheticCamera {
    descriptor: DeviceDescriptor,
    settings: Option<CaptureSettings>,
    opened: bool,
    frame_count: u64,
    capture_errors: u64,
    fail_open: bool,
    fail_configure: bool,
    /// Every Nth capture fails. Zero disables.
    fail_every: u64,
    /// The Nth capture panics, as a faulty driver would. Zero disables.
    panic_at: u64,
}

impl SyntheticCamera {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            settings: None,
            opened: false,
            frame_count: 0,
            capture_errors: 0,
            fail_open: false,
            fail_configure: false,
            fail_every: 0,
            panic_at: 0,
        }
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = n;
        self
    }

    pub fn panicking_at(mut self, n: u64) -> Self {
        self.panic_at = n;
        self
    }

    fn render(&self, settings: &CaptureSettings) -> Result<Vec<u8>> {
        let len = PixelFormat::Rgb24.expected_len(settings.width, settings.height)?;
        let shift = self.frame_count as usize;
        let width = settings.width.max(1) as usize;
        let mut pixels = vec![0u8; len];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let (x, y) = (i % width, i / width);
            px[0] = ((x + shift) % 256) as u8;
            px[1] = (y % 256) as u8;
            px[2] = 96;
        }
        Ok(pixels)
    }
}

impl CaptureDevice for SyntheticCamera {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(anyhow!("{} is held by another client", self.descriptor.selector));
        }
        self.opened = true;
        log::info!(
            "SyntheticCamera: opened {} (synthetic)",
            self.descriptor.selector
        );
        Ok(())
    }

    fn configure(&mut self, settings: &CaptureSettings) -> Result<()> {
        if !self.opened {
            return Err(anyhow!("{} not opened", self.descriptor.selector));
        }
        if self.fail_configure {
            return Err(anyhow!(
                "{} rejected {}x{}",
                self.descriptor.selector,
                settings.width,
                settings.height
            ));
        }
        if settings.width == 0 || settings.height == 0 {
            return Err(anyhow!("capture size must be non-zero"));
        }
        self.settings = Some(*settings);
        Ok(())
    }

    fn next_image(&mut self) -> Result<RawImage> {
        let settings = self
            .settings
            .context("synthetic camera not configured")?;
        self.frame_count += 1;
        if self.panic_at > 0 && self.frame_count == self.panic_at {
            self.capture_errors += 1;
            panic!("{}: driver fault on capture {}", self.descriptor.selector, self.frame_count);
        }
        if self.fail_every > 0 && self.frame_count % self.fail_every == 0 {
            self.capture_errors += 1;
            return Err(anyhow!("synthetic capture glitch"));
        }
        let pixels = self.render(&settings)?;
        RawImage::new(pixels, settings.width, settings.height, PixelFormat::Rgb24)
    }

    fn is_healthy(&self) -> bool {
        self.opened && self.settings.is_some()
    }

    fn stats(&self) -> DeviceStats {
        DeviceStats {
            frames_captured: self.frame_count - self.capture_errors,
            capture_errors: self.capture_errors,
            device: self.descriptor.selector.clone(),
        }
    }
}
