//! Unit-square geometry shared by the normalizer, detections and tracker.

use serde::Serialize;

/// Axis-aligned box in a unit-square coordinate space.
///
/// Which corner is the origin depends on the space the box lives in:
/// model space is bottom-left, display space is top-left.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.w / 2.0,
            y: self.y + self.h / 2.0,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
    }

    /// True when the whole box lies inside `[0,1]` on both axes.
    pub fn is_within_unit_square(&self) -> bool {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        in_unit(self.x)
            && in_unit(self.y)
            && self.w >= 0.0
            && self.h >= 0.0
            && self.x + self.w <= 1.0 + f32::EPSILON
            && self.y + self.h <= 1.0 + f32::EPSILON
    }

    /// Clamp into the unit square, keeping the origin and shrinking the extent.
    pub fn clamped(self) -> Self {
        let unit = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        let x = unit(self.x);
        let y = unit(self.y);
        Self {
            x,
            y,
            w: unit(self.w).min(1.0 - x),
            h: unit(self.h).min(1.0 - y),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Displacement per second in display-space units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Vector {
    pub dx: f32,
    pub dy: f32,
}

impl Vector {
    pub const ZERO: Vector = Vector { dx: 0.0, dy: 0.0 };

    /// Rate of change from `from` to `to` over `seconds`. Zero when no time elapsed.
    pub fn between(from: &Point, to: &Point, seconds: f32) -> Self {
        if seconds <= 0.0 || !seconds.is_finite() {
            return Self::ZERO;
        }
        Self {
            dx: (to.x - from.x) / seconds,
            dy: (to.y - from.y) / seconds,
        }
    }

    pub fn magnitude(&self) -> f32 {
        (self.dx * self.dx + self.dy * self.dy).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_shrinks_overhanging_extent() {
        let b = BoundingBox::new(0.9, -0.000_1, 0.2, 0.5).clamped();
        assert_eq!(b.x, 0.9);
        assert_eq!(b.y, 0.0);
        assert!((b.w - 0.1).abs() < 1e-6);
        assert_eq!(b.h, 0.5);
        assert!(b.is_within_unit_square());
    }

    #[test]
    fn clamping_zeroes_non_finite_values() {
        let b = BoundingBox::new(f32::NAN, 0.2, f32::INFINITY, 0.1).clamped();
        assert_eq!(b.x, 0.0);
        assert_eq!(b.w, 0.0);
        assert!(b.is_within_unit_square());
    }

    #[test]
    fn velocity_over_zero_time_is_zero() {
        let v = Vector::between(&Point::new(0.0, 0.0), &Point::new(1.0, 1.0), 0.0);
        assert_eq!(v, Vector::ZERO);
    }
}
