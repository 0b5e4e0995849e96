//! Raster flattener: burns annotations into a screenshot's pixels.
//!
//! Positions come from the authoritative pixel space, are rescaled if the
//! decoded image's size differs from the recorded one, and then shifted by
//! the render correction exactly once before drawing. Each annotation is
//! drawn as a pointer line with arrow head, a pinpoint dot, and a label box
//! with bitmap-font text.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use tracing::warn;

use snap_journal_core::coords::{Point, RenderCorrection, Size};
use snap_journal_core::error::{SnapError, SnapResult};
use snap_journal_core::models::Annotation;
use snap_journal_core::pointer::pointer_line;
use snap_journal_core::render::{Flattener, RasterImage};

use crate::capture::image_dimensions;
use crate::config::{parse_hex_color, StyleConfig};

const PINPOINT_DIAMETER: f64 = 12.0;
const PINPOINT_BORDER: f64 = 2.0;
const LINE_THICKNESS: i64 = 2;
const LABEL_BORDER: u32 = 2;
const LABEL_PADDING: u32 = 6;
const GLYPH: u32 = 8;
const WRAP_COLUMNS: usize = 32;
const WHITE: [u8; 3] = [255, 255, 255];
/// Positions beyond this distance from the origin are off any canvas.
const FAR: f64 = 1e9;

/// Resolved drawing colours.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub annotation: [u8; 3],
    pub text: [u8; 3],
    pub text_bg: [u8; 3],
    /// Label background opacity in `0.0..=1.0`.
    pub text_bg_alpha: f32,
    /// Integer glyph scale for the 8×8 font.
    pub glyph_scale: u32,
}

impl Palette {
    pub fn from_style(style: &StyleConfig) -> Self {
        Self {
            annotation: parse_hex_color(&style.annotation_color).unwrap_or([0xff, 0x44, 0x44]),
            text: parse_hex_color(&style.text_color).unwrap_or([0x33, 0x33, 0x33]),
            text_bg: parse_hex_color(&style.text_bg_color).unwrap_or(WHITE),
            text_bg_alpha: f32::from(style.text_bg_opacity.min(100)) / 100.0,
            glyph_scale: ((style.font_size as f32 / GLYPH as f32).round() as u32).max(1),
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::from_style(&StyleConfig::default())
    }
}

pub struct RasterFlattener {
    palette: Palette,
    correction: RenderCorrection,
}

impl RasterFlattener {
    pub fn new(palette: Palette, correction: RenderCorrection) -> Self {
        Self {
            palette,
            correction,
        }
    }

    fn draw_annotation(&self, canvas: &mut RgbaImage, anchor: Point, label: Point, text: &str) {
        let color = self.palette.annotation;
        if let Some(line) = pointer_line(anchor, label) {
            draw_line(canvas, line.start, line.tip, LINE_THICKNESS, color);
            fill_triangle(canvas, line.head(), color);
        }
        let (anchor, label) = (clamp_far(anchor), clamp_far(label));
        let r = PINPOINT_DIAMETER / 2.0;
        fill_circle(canvas, anchor, r + PINPOINT_BORDER, WHITE, 1.0);
        fill_circle(canvas, anchor, r, color, 1.0);
        self.draw_label(canvas, label, text);
    }

    fn draw_label(&self, canvas: &mut RgbaImage, center: Point, text: &str) {
        let scale = self.palette.glyph_scale;
        let lines = wrap(text, WRAP_COLUMNS);
        let columns = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as u32;
        let line_height = GLYPH * scale + scale;
        let inner_w = columns * GLYPH * scale + 2 * LABEL_PADDING;
        let inner_h = lines.len() as u32 * line_height + 2 * LABEL_PADDING;
        let w = inner_w + 2 * LABEL_BORDER;
        let h = inner_h + 2 * LABEL_BORDER;
        let left = center.x.round() as i64 - i64::from(w / 2);
        let top = center.y.round() as i64 - i64::from(h / 2);

        fill_rect(canvas, left, top, w, h, self.palette.annotation, 1.0);
        fill_rect(
            canvas,
            left + i64::from(LABEL_BORDER),
            top + i64::from(LABEL_BORDER),
            inner_w,
            inner_h,
            self.palette.text_bg,
            self.palette.text_bg_alpha,
        );

        let text_left = left + i64::from(LABEL_BORDER + LABEL_PADDING);
        let mut y = top + i64::from(LABEL_BORDER + LABEL_PADDING);
        for line in &lines {
            let mut x = text_left;
            for c in line.chars() {
                draw_glyph(canvas, x, y, c, scale, self.palette.text);
                x += i64::from(GLYPH * scale);
            }
            y += i64::from(line_height);
        }
    }
}

impl Flattener for RasterFlattener {
    fn flatten(&self, payload: &[u8], natural: Size, annotations: &[Annotation]) -> SnapResult<RasterImage> {
        let decoded = image::load_from_memory(payload).map_err(SnapError::backend)?;
        let mut canvas = decoded.to_rgba8();
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return Err(SnapError::InvalidInput("image has no pixels".into()));
        }

        let (w, h) = (f64::from(width), f64::from(height));
        let (sx, sy) = if natural.is_degenerate() {
            (1.0, 1.0)
        } else {
            (w / natural.width, h / natural.height)
        };
        if (sx - 1.0).abs() > f64::EPSILON || (sy - 1.0).abs() > f64::EPSILON {
            warn!(
                recorded_width = natural.width,
                recorded_height = natural.height,
                actual_width = width,
                actual_height = height,
                "flattening with rescaled annotation positions"
            );
        }

        for a in annotations {
            let anchor = Point::new(a.anchor.x * sx, a.anchor.y * sy);
            let label = Point::new(a.label_offset.x * sx, a.label_offset.y * sy);
            self.draw_annotation(
                &mut canvas,
                self.correction.apply(anchor, w, h),
                self.correction.apply(label, w, h),
                &a.text,
            );
        }

        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(canvas)
            .write_to(&mut out, ImageFormat::Png)
            .map_err(SnapError::backend)?;
        Ok(RasterImage {
            data: out.into_inner(),
            width,
            height,
        })
    }

    fn probe(&self, payload: &[u8]) -> SnapResult<(u32, u32)> {
        image_dimensions(payload)
    }
}

// ── pixel primitives ───────────────────────────────────────────────

fn blend(canvas: &mut RgbaImage, x: i64, y: i64, color: [u8; 3], alpha: f32) {
    if x < 0 || y < 0 || x >= i64::from(canvas.width()) || y >= i64::from(canvas.height()) {
        return;
    }
    let px = canvas.get_pixel_mut(x as u32, y as u32);
    let Rgba([r, g, b, a]) = *px;
    let mix = |dst: u8, src: u8| (f32::from(src) * alpha + f32::from(dst) * (1.0 - alpha)).round() as u8;
    *px = Rgba([mix(r, color[0]), mix(g, color[1]), mix(b, color[2]), a.max((alpha * 255.0) as u8)]);
}

fn clamp_far(p: Point) -> Point {
    Point::new(p.x.clamp(-FAR, FAR), p.y.clamp(-FAR, FAR))
}

/// Clip `from → to` to the canvas grown by `margin` on every side
/// (Liang-Barsky). `None` when the segment misses it entirely.
fn clip_segment(from: Point, to: Point, width: f64, height: f64, margin: f64) -> Option<(Point, Point)> {
    let (dx, dy) = (to.x - from.x, to.y - from.y);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    let edges = [
        (-dx, from.x + margin),
        (dx, width + margin - from.x),
        (-dy, from.y + margin),
        (dy, height + margin - from.y),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let t = q / p;
        if p < 0.0 {
            t0 = t0.max(t);
        } else {
            t1 = t1.min(t);
        }
        if t0 > t1 {
            return None;
        }
    }
    // Rounding on huge inputs can land slightly outside; keep it in bounds.
    let bound = |p: Point| {
        Point::new(
            p.x.clamp(-margin, width + margin),
            p.y.clamp(-margin, height + margin),
        )
    };
    Some((
        bound(Point::new(from.x + dx * t0, from.y + dy * t0)),
        bound(Point::new(from.x + dx * t1, from.y + dy * t1)),
    ))
}

fn fill_rect(canvas: &mut RgbaImage, left: i64, top: i64, w: u32, h: u32, color: [u8; 3], alpha: f32) {
    let (cw, ch) = (i64::from(canvas.width()), i64::from(canvas.height()));
    let (x0, x1) = (left.max(0), left.saturating_add(i64::from(w)).min(cw));
    let (y0, y1) = (top.max(0), top.saturating_add(i64::from(h)).min(ch));
    for y in y0..y1 {
        for x in x0..x1 {
            blend(canvas, x, y, color, alpha);
        }
    }
}

fn fill_circle(canvas: &mut RgbaImage, center: Point, radius: f64, color: [u8; 3], alpha: f32) {
    let r = radius.ceil() as i64;
    let (cx, cy) = (center.x.round() as i64, center.y.round() as i64);
    for dy in -r..=r {
        for dx in -r..=r {
            if ((dx * dx + dy * dy) as f64) <= radius * radius {
                blend(canvas, cx + dx, cy + dy, color, alpha);
            }
        }
    }
}

fn draw_line(canvas: &mut RgbaImage, from: Point, to: Point, thickness: i64, color: [u8; 3]) {
    let (w, h) = (f64::from(canvas.width()), f64::from(canvas.height()));
    let Some((from, to)) = clip_segment(from, to, w, h, thickness as f64) else {
        return;
    };
    let (dx, dy) = (to.x - from.x, to.y - from.y);
    let steps = (dx.hypot(dy) * 2.0).ceil().max(1.0) as i64;
    let half = (thickness / 2).max(0);
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let cx = (from.x + dx * t).round() as i64;
        let cy = (from.y + dy * t).round() as i64;
        for oy in -half..=half {
            for ox in -half..=half {
                blend(canvas, cx + ox, cy + oy, color, 1.0);
            }
        }
    }
}

fn fill_triangle(canvas: &mut RgbaImage, [a, b, c]: [Point; 3], color: [u8; 3]) {
    let edge = |p: Point, q: Point, x: f64, y: f64| (q.x - p.x) * (y - p.y) - (q.y - p.y) * (x - p.x);
    let (cw, ch) = (i64::from(canvas.width()), i64::from(canvas.height()));
    let min_x = (a.x.min(b.x).min(c.x).floor() as i64).max(0);
    let max_x = (a.x.max(b.x).max(c.x).ceil() as i64).min(cw - 1);
    let min_y = (a.y.min(b.y).min(c.y).floor() as i64).max(0);
    let max_y = (a.y.max(b.y).max(c.y).ceil() as i64).min(ch - 1);
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let (px, py) = (x as f64 + 0.5, y as f64 + 0.5);
            let e0 = edge(a, b, px, py);
            let e1 = edge(b, c, px, py);
            let e2 = edge(c, a, px, py);
            let inside = (e0 >= 0.0 && e1 >= 0.0 && e2 >= 0.0) || (e0 <= 0.0 && e1 <= 0.0 && e2 <= 0.0);
            if inside {
                blend(canvas, x, y, color, 1.0);
            }
        }
    }
}

fn draw_glyph(canvas: &mut RgbaImage, left: i64, top: i64, c: char, scale: u32, color: [u8; 3]) {
    let Some(rows) = BASIC_FONTS.get(c).or_else(|| BASIC_FONTS.get('?')) else {
        return;
    };
    let scale = i64::from(scale);
    let size = 8 * scale;
    if left + size <= 0 || top + size <= 0 || left >= i64::from(canvas.width()) || top >= i64::from(canvas.height()) {
        return;
    }
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..8 {
            if *bits & (1u8 << col) == 0 {
                continue;
            }
            let x0 = left + col as i64 * scale;
            let y0 = top + row as i64 * scale;
            for sy in 0..scale {
                for sx in 0..scale {
                    blend(canvas, x0 + sx, y0 + sy, color, 1.0);
                }
            }
        }
    }
}

/// Greedy word wrap at `columns` characters; long words are split.
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > columns {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                lines.push(word.drain(..columns).collect());
            }
            let word: String = word.into_iter().collect();
            let needed = current.chars().count() + usize::from(!current.is_empty()) + word.chars().count();
            if needed > columns && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&word);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn png(w: u32, h: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([10, 20, 30])))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn pixel(data: &[u8], x: u32, y: u32) -> [u8; 4] {
        image::load_from_memory(data).unwrap().to_rgba8().get_pixel(x, y).0
    }

    #[test]
    fn burns_pinpoint_at_anchor_without_correction() {
        let flattener = RasterFlattener::new(Palette::default(), RenderCorrection::disabled());
        let a = Annotation::new(Point::new(50.0, 50.0), Point::new(150.0, 50.0), "hi");
        let out = flattener
            .flatten(&png(200, 100), Size::new(200.0, 100.0), &[a])
            .unwrap();
        assert_eq!((out.width, out.height), (200, 100));
        assert_eq!(&pixel(&out.data, 50, 50)[..3], &[0xff, 0x44, 0x44]);
        assert_eq!(&pixel(&out.data, 5, 95)[..3], &[10, 20, 30]);
    }

    #[test]
    fn correction_shifts_burned_positions() {
        let flattener = RasterFlattener::new(Palette::default(), RenderCorrection::default());
        // 1920x1080 shifts by 36.48 px on both axes.
        let a = Annotation::new(Point::new(300.0, 300.0), Point::new(1000.0, 800.0), "note");
        let out = flattener
            .flatten(&png(1920, 1080), Size::new(1920.0, 1080.0), &[a])
            .unwrap();
        assert_eq!(&pixel(&out.data, 264, 264)[..3], &[0xff, 0x44, 0x44]);
        assert_eq!(&pixel(&out.data, 300, 300)[..3], &[10, 20, 30]);
    }

    #[test]
    fn undecodable_payload_is_an_error() {
        let flattener = RasterFlattener::new(Palette::default(), RenderCorrection::default());
        assert!(flattener.flatten(b"nope", Size::new(1.0, 1.0), &[]).is_err());
        assert!(flattener.probe(b"nope").is_err());
        assert_eq!(flattener.probe(&png(7, 3)).unwrap(), (7, 3));
    }

    #[test]
    fn wrap_breaks_on_words_and_splits_long_ones() {
        assert_eq!(wrap("one two three", 7), vec!["one two", "three"]);
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap("", 4), vec![""]);
    }

    #[test]
    fn glyph_scale_tracks_font_size() {
        let style = StyleConfig {
            font_size: 24,
            ..StyleConfig::default()
        };
        assert_eq!(Palette::from_style(&style).glyph_scale, 3);
        assert_eq!(Palette::default().glyph_scale, 2);
    }

    #[test]
    fn far_off_canvas_annotation_draws_only_the_visible_part() {
        let flattener = RasterFlattener::new(Palette::default(), RenderCorrection::disabled());
        let a = Annotation::new(Point::new(-1e12, 50.0), Point::new(1e12, 50.0), "far away");
        let out = flattener
            .flatten(&png(200, 100), Size::new(200.0, 100.0), &[a])
            .unwrap();
        assert_eq!(&pixel(&out.data, 100, 50)[..3], &[0xff, 0x44, 0x44]);
        assert_eq!(&pixel(&out.data, 100, 5)[..3], &[10, 20, 30]);

        let extreme = Annotation::new(Point::new(1e300, -1e300), Point::new(-1e300, 1e300), "gone");
        let out = flattener
            .flatten(&png(20, 20), Size::new(20.0, 20.0), &[extreme])
            .unwrap();
        assert_eq!((out.width, out.height), (20, 20));
    }

    #[test]
    fn clip_segment_trims_to_canvas() {
        let (a, b) = clip_segment(Point::new(-100.0, 5.0), Point::new(300.0, 5.0), 100.0, 10.0, 0.0).unwrap();
        assert!(a.approx_eq(Point::new(0.0, 5.0), 1e-9));
        assert!(b.approx_eq(Point::new(100.0, 5.0), 1e-9));

        let inside = (Point::new(1.0, 1.0), Point::new(9.0, 9.0));
        assert_eq!(clip_segment(inside.0, inside.1, 10.0, 10.0, 0.0), Some(inside));
        assert_eq!(clip_segment(Point::new(-5.0, -5.0), Point::new(-1.0, 50.0), 10.0, 10.0, 0.0), None);
        assert_eq!(clip_segment(Point::new(0.0, 20.0), Point::new(10.0, 20.0), 10.0, 10.0, 2.0), None);
    }
}
