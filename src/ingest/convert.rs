//! Pixel layout conversion for device buffers.

use anyhow::{anyhow, Result};

use crate::frame::{PixelFormat, RawImage};

/// Layouts a capture backend may deliver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceLayout {
    Rgb24,
    Bgra32,
    Nv12,
}

/// Convert a device buffer into an image the pipeline accepts.
///
/// RGB and BGRA pass through (after length checks); NV12 becomes RGB.
pub fn to_raw_image(
    pixels: &[u8],
    width: u32,
    height: u32,
    layout: SourceLayout,
) -> Result<RawImage> {
    match layout {
        SourceLayout::Rgb24 => RawImage::new(pixels.to_vec(), width, height, PixelFormat::Rgb24),
        SourceLayout::Bgra32 => RawImage::new(pixels.to_vec(), width, height, PixelFormat::Bgra32),
        SourceLayout::Nv12 => {
            let rgb = nv12_to_rgb(pixels, width, height)?;
            RawImage::new(rgb, width, height, PixelFormat::Rgb24)
        }
    }
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(anyhow!("NV12 frame must be non-empty, got {}x{}", width, height));
    }
    let w = width as usize;
    let h = height as usize;
    // Chroma is subsampled 2x2, rounding up on odd dimensions.
    let uv_stride = w.div_ceil(2) * 2;
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let expected = uv_stride
        .checked_mul(h.div_ceil(2))
        .and_then(|uv_plane| uv_plane.checked_add(y_plane))
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for (j, row) in rgb.chunks_exact_mut(w * 3).enumerate() {
        let uv_row = y_plane + (j / 2) * uv_stride;
        for (i, px) in row.chunks_exact_mut(3).enumerate() {
            let luma = pixels[j * w + i] as f32;
            let uv = uv_row + (i / 2) * 2;
            let u = pixels[uv] as f32 - 128.0;
            let v = pixels[uv + 1] as f32 - 128.0;

            px[0] = to_u8(luma + 1.402 * v);
            px[1] = to_u8(luma - 0.344_136 * u - 0.714_136 * v);
            px[2] = to_u8(luma + 1.772 * u);
        }
    }
    Ok(rgb)
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Swap a BGRA buffer into packed RGB, dropping alpha.
pub fn bgra_to_rgb(pixels: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() / 4 * 3);
    for px in pixels.chunks_exact(4) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    rgb
}
