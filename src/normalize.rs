//! Model space ↔ display space box conversion.
//!
//! Model space: unit square, origin bottom-left, no notion of device orientation.
//! Display space: unit square, origin top-left, oriented for the current rotation
//! and mirroring.
//!
//! Conversion first flips the y axis (`y' = 1 - y - h`), then rotates, then
//! mirrors. Results are clamped into the unit square; nothing is discarded.

use crate::frame::{Orientation, Rotation};
use crate::geometry::BoundingBox;

/// Convert a model-space box into display space for `orientation`.
pub fn to_display(bbox: BoundingBox, orientation: Orientation) -> BoundingBox {
    let flipped = flip_vertical(bbox);
    let rotated = rotate(flipped, orientation.rotation);
    let out = if orientation.mirrored {
        mirror(rotated)
    } else {
        rotated
    };
    out.clamped()
}

/// Convert a display-space box back into model space. Inverse of [`to_display`].
pub fn to_model(bbox: BoundingBox, orientation: Orientation) -> BoundingBox {
    let unmirrored = if orientation.mirrored {
        mirror(bbox)
    } else {
        bbox
    };
    let unrotated = unrotate(unmirrored, orientation.rotation);
    flip_vertical(unrotated).clamped()
}

fn flip_vertical(b: BoundingBox) -> BoundingBox {
    BoundingBox::new(b.x, 1.0 - b.y - b.h, b.w, b.h)
}

fn mirror(b: BoundingBox) -> BoundingBox {
    BoundingBox::new(1.0 - b.x - b.w, b.y, b.w, b.h)
}

fn rotate_cw(b: BoundingBox) -> BoundingBox {
    // (u, v) -> (1 - v, u)
    BoundingBox::new(1.0 - b.y - b.h, b.x, b.h, b.w)
}

fn rotate_ccw(b: BoundingBox) -> BoundingBox {
    // (u, v) -> (v, 1 - u)
    BoundingBox::new(b.y, 1.0 - b.x - b.w, b.h, b.w)
}

fn rotate(b: BoundingBox, rotation: Rotation) -> BoundingBox {
    match rotation {
        Rotation::Portrait => b,
        Rotation::PortraitUpsideDown => BoundingBox::new(1.0 - b.x - b.w, 1.0 - b.y - b.h, b.w, b.h),
        Rotation::LandscapeLeft => rotate_cw(b),
        Rotation::LandscapeRight => rotate_ccw(b),
    }
}

fn unrotate(b: BoundingBox, rotation: Rotation) -> BoundingBox {
    match rotation {
        Rotation::Portrait | Rotation::PortraitUpsideDown => rotate(b, rotation),
        Rotation::LandscapeLeft => rotate_ccw(b),
        Rotation::LandscapeRight => rotate_cw(b),
    }
}
