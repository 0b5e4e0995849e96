//! Geometry of the pointer line joining an annotation's pinpoint to its
//! label box.

use crate::coords::Point;

/// Gap left between the line's tip and the label centre.
pub const LABEL_CLEARANCE: f64 = 25.0;
pub const ARROW_HEAD_SIZE: f64 = 8.0;
/// Half-angle of the arrow head, in radians.
pub const ARROW_HEAD_SPREAD: f64 = 0.5;
/// Pointers at or below this length are not drawn.
pub const MIN_POINTER_LENGTH: f64 = 20.0;

/// A visible pointer: the shaft plus a triangular head at `tip`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerLine {
    pub start: Point,
    pub tip: Point,
    pub head_left: Point,
    pub head_right: Point,
}

impl PointerLine {
    pub fn head(&self) -> [Point; 3] {
        [self.tip, self.head_left, self.head_right]
    }
}

/// Line from `anchor` toward `label`, or `None` when the two are too close
/// for a pointer to be visible.
pub fn pointer_line(anchor: Point, label: Point) -> Option<PointerLine> {
    let dx = label.x - anchor.x;
    let dy = label.y - anchor.y;
    if dx.hypot(dy) <= MIN_POINTER_LENGTH {
        return None;
    }

    let angle = dy.atan2(dx);
    let tip = Point::new(
        label.x - angle.cos() * LABEL_CLEARANCE,
        label.y - angle.sin() * LABEL_CLEARANCE,
    );
    let back = angle + std::f64::consts::PI;
    let head_at = |a: f64| Point::new(tip.x + a.cos() * ARROW_HEAD_SIZE, tip.y + a.sin() * ARROW_HEAD_SIZE);

    Some(PointerLine {
        start: anchor,
        tip,
        head_left: head_at(back + ARROW_HEAD_SPREAD),
        head_right: head_at(back - ARROW_HEAD_SPREAD),
    })
}
