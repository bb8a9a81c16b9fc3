//! V4L2 capture device.
//!
//! `V4l2Camera` captures from a local device node (e.g. /dev/video0).
//!
//! The V4L2 camera is responsible for:
//! - Opening the device node and negotiating size, pixel format, and frame rate
//! - Converting NV12 buffers to RGB
//! - Reporting health from the time since the last good frame
//!
//! The V4L2 camera MUST NOT:
//! - Keep frame buffers beyond the `next_image` call
//! - Retry opening a device the session gave up on

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::convert::{to_raw_image, SourceLayout};
use super::{CaptureDevice, CaptureSettings, DeviceDescriptor, DeviceStats, LensPosition};
use crate::frame::RawImage;

pub struct V4l2Camera {
    descriptor: DeviceDescriptor,
    device: Option<v4l::Device>,
    state: Option<StreamState>,
    target_fps: u32,
    layout: SourceLayout,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    capture_errors: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            device: None,
            state: None,
            target_fps: 0,
            layout: SourceLayout::Rgb24,
            active_width: 0,
            active_height: 0,
            frame_count: 0,
            capture_errors: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            2_000
        } else {
            (1000 / self.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl CaptureDevice for V4l2Camera {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn open(&mut self) -> Result<()> {
        let device = v4l::Device::with_path(&self.descriptor.selector)
            .with_context(|| format!("open v4l2 device {}", self.descriptor.selector))?;
        self.device = Some(device);
        self.last_error = None;
        Ok(())
    }

    fn configure(&mut self, settings: &CaptureSettings) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = self
            .device
            .take()
            .ok_or_else(|| anyhow!("{} not opened", self.descriptor.selector))?;

        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.descriptor.selector,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.layout = match &format.fourcc.repr {
            b"RGB3" => SourceLayout::Rgb24,
            b"NV12" => SourceLayout::Nv12,
            b"BGR4" | b"AR24" => SourceLayout::Bgra32,
            other => {
                return Err(anyhow!(
                    "{} offers unsupported pixel format {}",
                    self.descriptor.selector,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        if settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Camera: failed to set fps on {}: {}",
                    self.descriptor.selector,
                    err
                );
            }
        }

        self.target_fps = settings.target_fps;
        self.active_width = format.width;
        self.active_height = format.height;

        let state = StreamStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: configured {} ({}x{} {:?})",
            self.descriptor.selector,
            self.active_width,
            self.active_height,
            self.layout
        );
        Ok(())
    }

    fn next_image(&mut self) -> Result<RawImage> {
        use v4l::io::traits::CaptureStream;

        let (width, height, layout) = (self.active_width, self.active_height, self.layout);
        let state = self.state.as_mut().context("v4l2 device not configured")?;
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))
                .and_then(|(buf, _meta)| to_raw_image(buf, width, height, layout))
        });

        match captured {
            Ok(image) => {
                self.frame_count += 1;
                self.last_frame_at = Some(Instant::now());
                self.last_error = None;
                Ok(image)
            }
            Err(err) => {
                self.capture_errors += 1;
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        if self.state.is_none() || self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> DeviceStats {
        DeviceStats {
            frames_captured: self.frame_count,
            capture_errors: self.capture_errors,
            device: self.descriptor.selector.clone(),
        }
    }
}

/// Device nodes present on this machine.
pub fn discover() -> Vec<DeviceDescriptor> {
    let mut found: Vec<DeviceDescriptor> = v4l::context::enum_devices()
        .into_iter()
        .filter_map(|node| {
            node.path()
                .to_str()
                .map(|path| DeviceDescriptor::new(path, LensPosition::External))
        })
        .collect();
    found.sort_by(|a, b| a.selector.cmp(&b.selector));
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopened_camera_cannot_be_configured() {
        let mut cam = V4l2Camera::new(DeviceDescriptor::new(
            "/dev/video-missing",
            LensPosition::External,
        ));
        assert!(cam.open().is_err());
        assert!(cam.configure(&CaptureSettings::default()).is_err());
        assert!(!cam.is_healthy());
    }
}
