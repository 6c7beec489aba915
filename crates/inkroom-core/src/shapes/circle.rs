//! Circle shape.

use super::{ShapeError, ShapeKind, ShapeTrait, is_finite_point};
use kurbo::{BezPath, Point, Rect, Shape as KurboShape};
use serde::{Deserialize, Serialize};

/// Path flattening tolerance used when converting the circle to Bézier segments.
const PATH_TOLERANCE: f64 = 0.1;

/// An outlined circle inscribed in the drag bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    #[serde(rename = "centerX")]
    pub center_x: f64,
    #[serde(rename = "centerY")]
    pub center_y: f64,
    pub radius: f64,
}

impl Circle {
    /// Create a new circle.
    pub fn new(center: Point, radius: f64) -> Self {
        Self {
            center_x: center.x,
            center_y: center.y,
            radius,
        }
    }

    /// Create a circle from a drag.
    ///
    /// The center is the midpoint of the drag box (not the anchor) and the
    /// radius is half of the larger extent, so it is never negative.
    pub fn from_drag(anchor: Point, current: Point) -> Self {
        let dx = current.x - anchor.x;
        let dy = current.y - anchor.y;
        let radius = dx.abs().max(dy.abs()) / 2.0;
        Self::new(Point::new(anchor.x + dx / 2.0, anchor.y + dy / 2.0), radius)
    }

    pub fn center(&self) -> Point {
        Point::new(self.center_x, self.center_y)
    }

    /// Radius used for drawing. Peers that send a negative radius are drawn
    /// with its magnitude.
    pub fn drawn_radius(&self) -> f64 {
        self.radius.abs()
    }
}

impl ShapeTrait for Circle {
    fn bounds(&self) -> Rect {
        let r = self.drawn_radius();
        Rect::from_center_size(self.center(), (r * 2.0, r * 2.0))
    }

    fn to_path(&self) -> BezPath {
        kurbo::Circle::new(self.center(), self.drawn_radius()).to_path(PATH_TOLERANCE)
    }

    fn validate(&self) -> Result<(), ShapeError> {
        if is_finite_point(self.center()) && self.radius.is_finite() {
            Ok(())
        } else {
            Err(ShapeError::NonFinite { kind: ShapeKind::Circle })
        }
    }
}
