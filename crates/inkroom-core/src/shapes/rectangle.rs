//! Rectangle shape.

use super::{ShapeError, ShapeKind, ShapeTrait, is_finite_point};
use kurbo::{BezPath, Point, Rect};
use serde::{Deserialize, Serialize};

/// An outlined rectangle anchored at the pointer-down corner.
///
/// `width` and `height` keep their sign: a drag up or to the left produces
/// negative extents, which are stored and rendered as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    /// Anchor corner x.
    pub x: f64,
    /// Anchor corner y.
    pub y: f64,
    /// Signed horizontal extent.
    pub width: f64,
    /// Signed vertical extent.
    pub height: f64,
}

impl Rectangle {
    /// Create a new rectangle.
    pub fn new(anchor: Point, width: f64, height: f64) -> Self {
        Self {
            x: anchor.x,
            y: anchor.y,
            width,
            height,
        }
    }

    /// Create a rectangle from a drag: anchor plus current-minus-anchor extents.
    pub fn from_drag(anchor: Point, current: Point) -> Self {
        Self::new(anchor, current.x - anchor.x, current.y - anchor.y)
    }

    /// Anchor corner.
    pub fn anchor(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Corner opposite the anchor.
    pub fn far_corner(&self) -> Point {
        Point::new(self.x + self.width, self.y + self.height)
    }
}

impl ShapeTrait for Rectangle {
    fn bounds(&self) -> Rect {
        Rect::from_points(self.anchor(), self.far_corner()).abs()
    }

    fn to_path(&self) -> BezPath {
        // Walk the corners starting at the anchor; negative extents just
        // reverse the winding.
        let a = self.anchor();
        let b = self.far_corner();
        let mut path = BezPath::new();
        path.move_to(a);
        path.line_to(Point::new(b.x, a.y));
        path.line_to(b);
        path.line_to(Point::new(a.x, b.y));
        path.close_path();
        path
    }

    fn validate(&self) -> Result<(), ShapeError> {
        if is_finite_point(self.anchor()) && is_finite_point(self.far_corner()) {
            Ok(())
        } else {
            Err(ShapeError::NonFinite { kind: ShapeKind::Rect })
        }
    }
}
