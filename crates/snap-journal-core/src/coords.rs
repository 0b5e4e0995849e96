//! Coordinate model.
//!
//! Every annotation position is stored once, in the authoritative pixel
//! space of the captured image (its natural width × height). Rendering
//! surfaces (thumbnail, interactive overlay, output page) never mutate the
//! stored value; they ask for a *derived* position with [`to_surface`] and
//! convert pointer input back with [`from_surface`].
//!
//! # Scaling
//!
//! A single factor `surface.width / natural.width` is applied to both axes.
//! Captures have a fixed aspect ratio, so deriving the factor from width
//! keeps the mapping aspect-locked. A surface with a different aspect ratio
//! gets visually offset but internally consistent placement.
//!
//! # Render correction
//!
//! The flattened output image shows a systematic offset against the
//! interactive overlay. [`RenderCorrection`] compensates for it with a
//! physical offset (inches at a reference DPI), scaled inversely with the
//! image extent relative to a reference capture size. It is applied exactly
//! once, at final flattening time.

use serde::{Deserialize, Serialize};

/// A position in some pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn distance_to(self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Component-wise comparison within `tolerance`.
    pub fn approx_eq(self, other: Point, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance && (self.y - other.y).abs() <= tolerance
    }

    /// Neither component is NaN or infinite. Only finite points can be
    /// stored: JSON has no encoding for the others.
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Width and height of an image or surface, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.width.is_finite() && self.height.is_finite()
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }
}

impl From<(u32, u32)> for Size {
    fn from((w, h): (u32, u32)) -> Self {
        Size::new(f64::from(w), f64::from(h))
    }
}

/// Uniform natural → surface factor. Degenerate sizes map 1:1.
pub fn scale_factor(natural: Size, surface: Size) -> f64 {
    if natural.width > 0.0 && surface.width > 0.0 {
        surface.width / natural.width
    } else {
        1.0
    }
}

/// Derive a surface position from an authoritative-space point.
pub fn to_surface(point: Point, natural: Size, surface: Size) -> Point {
    let scale = scale_factor(natural, surface);
    Point::new(point.x * scale, point.y * scale)
}

/// Convert a surface position (click, drag tick) back to authoritative space.
pub fn from_surface(point: Point, natural: Size, surface: Size) -> Point {
    let scale = scale_factor(natural, surface);
    Point::new(point.x / scale, point.y / scale)
}

/// Empirical offset applied when annotations are burned into the output
/// image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderCorrection {
    pub enabled: bool,
    /// Nominal DPI used to convert `offset_inches` to pixels.
    pub reference_dpi: f64,
    /// Physical offset observed between overlay and flattened output.
    pub offset_inches: f64,
    /// Image extent at which the pixel delta equals the full physical offset.
    pub reference_size: Size,
}

impl Default for RenderCorrection {
    fn default() -> Self {
        Self {
            enabled: true,
            reference_dpi: 96.0,
            offset_inches: 0.38,
            reference_size: Size::new(1920.0, 1080.0),
        }
    }
}

impl RenderCorrection {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// The physical offset in pixels at the reference DPI.
    pub fn target_px(&self) -> f64 {
        self.reference_dpi * self.offset_inches
    }

    /// Pixel delta for an image of the given size.
    ///
    /// Zero for a disabled correction or a zero-sized image.
    pub fn offset_for(&self, image_width: f64, image_height: f64) -> Point {
        if !self.enabled || image_width <= 0.0 || image_height <= 0.0 {
            return Point::ORIGIN;
        }
        let px = self.target_px();
        Point::new(
            px * self.reference_size.width / image_width,
            px * self.reference_size.height / image_height,
        )
    }

    /// Subtract the correction delta from both axes of `point`.
    pub fn apply(&self, point: Point, image_width: f64, image_height: f64) -> Point {
        let delta = self.offset_for(image_width, image_height);
        Point::new(point.x - delta.x, point.y - delta.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn round_trip_is_exact_across_surfaces() {
        let natural = Size::new(1920.0, 1080.0);
        let anchors = [
            Point::new(0.0, 0.0),
            Point::new(123.5, 987.25),
            Point::new(1919.0, 1079.0),
        ];
        for surface in [
            Size::new(320.0, 180.0),
            Size::new(1280.0, 720.0),
            Size::new(2560.0, 1440.0),
            Size::new(777.0, 1000.0),
        ] {
            for anchor in anchors {
                let shown = to_surface(anchor, natural, surface);
                let back = from_surface(shown, natural, surface);
                assert!(back.approx_eq(anchor, 1e-6), "{:?} -> {:?}", anchor, back);
            }
        }
    }

    #[test]
    fn scale_is_width_derived_for_both_axes() {
        let natural = Size::new(1000.0, 500.0);
        let surface = Size::new(500.0, 400.0);
        let p = to_surface(Point::new(100.0, 100.0), natural, surface);
        assert!(p.approx_eq(Point::new(50.0, 50.0), EPS));
    }

    #[test]
    fn degenerate_sizes_map_one_to_one() {
        let p = Point::new(10.0, 20.0);
        assert_eq!(to_surface(p, Size::default(), Size::new(100.0, 100.0)), p);
        assert_eq!(from_surface(p, Size::new(100.0, 100.0), Size::default()), p);
    }

    #[test]
    fn correction_on_reference_capture_is_full_offset() {
        let c = RenderCorrection::default();
        let d = c.offset_for(1920.0, 1080.0);
        assert!((d.x - 36.48).abs() < 1e-9);
        assert!((d.y - 36.48).abs() < 1e-9);
        let moved = c.apply(Point::new(100.0, 100.0), 1920.0, 1080.0);
        assert!(moved.approx_eq(Point::new(63.52, 63.52), 1e-9));
    }

    #[test]
    fn correction_shrinks_as_image_grows() {
        let c = RenderCorrection::default();
        let small = c.offset_for(1920.0, 1080.0);
        let large = c.offset_for(3840.0, 2160.0);
        assert!(large.x > 0.0 && large.y > 0.0);
        assert!(large.x < small.x && large.y < small.y);
    }

    #[test]
    fn correction_is_zero_for_zero_size_or_disabled() {
        let c = RenderCorrection::default();
        assert_eq!(c.offset_for(0.0, 0.0), Point::ORIGIN);
        assert_eq!(c.offset_for(1920.0, 0.0), Point::ORIGIN);
        let off = RenderCorrection::disabled();
        let p = Point::new(5.0, 5.0);
        assert_eq!(off.apply(p, 1920.0, 1080.0), p);
    }
}
