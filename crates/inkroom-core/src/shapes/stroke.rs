//! Freehand stroke geometry shared by pencil and eraser shapes.

use super::{ShapeError, ShapeKind, ShapeTrait, is_finite_point};
use kurbo::{BezPath, Point, Rect};
use serde::{Deserialize, Serialize};

/// Minimum number of points in a committed stroke.
pub const MIN_STROKE_POINTS: usize = 2;

/// An ordered polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    /// Points in drawing order.
    pub points: Vec<Point>,
}

impl Stroke {
    /// Create from accumulated points.
    ///
    /// Returns `None` when fewer than two points were collected: a click with
    /// no movement is not a stroke.
    pub fn from_points(points: Vec<Point>) -> Option<Self> {
        if points.len() < MIN_STROKE_POINTS {
            return None;
        }
        Some(Self { points })
    }

    /// Get the number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the stroke has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl ShapeTrait for Stroke {
    fn bounds(&self) -> Rect {
        let Some(first) = self.points.first() else {
            return Rect::ZERO;
        };
        self.points
            .iter()
            .skip(1)
            .fold(Rect::from_points(*first, *first), |acc, p| acc.union_pt(*p))
    }

    fn to_path(&self) -> BezPath {
        let mut path = BezPath::new();
        let mut iter = self.points.iter();
        if let Some(first) = iter.next() {
            path.move_to(*first);
            for p in iter {
                path.line_to(*p);
            }
        }
        path
    }

    fn validate(&self) -> Result<(), ShapeError> {
        if self.points.len() < MIN_STROKE_POINTS {
            return Err(ShapeError::DegenerateStroke {
                kind: ShapeKind::Pencil,
                len: self.points.len(),
            });
        }
        if !self.points.iter().copied().all(is_finite_point) {
            return Err(ShapeError::NonFinite { kind: ShapeKind::Pencil });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_point_is_not_a_stroke() {
        assert!(Stroke::from_points(vec![Point::new(1.0, 1.0)]).is_none());
        assert!(Stroke::from_points(Vec::new()).is_none());
    }

    #[test]
    fn test_two_points_is_a_stroke() {
        let stroke = Stroke::from_points(vec![Point::new(1.0, 1.0), Point::new(1.0, 1.0)]).unwrap();
        assert_eq!(stroke.len(), 2);
        assert!(stroke.validate().is_ok());
    }

    #[test]
    fn test_bounds() {
        let stroke = Stroke {
            points: vec![Point::new(10.0, 5.0), Point::new(-2.0, 8.0), Point::new(4.0, 20.0)],
        };
        let bounds = stroke.bounds();
        assert!((bounds.x0 + 2.0).abs() < f64::EPSILON);
        assert!((bounds.y0 - 5.0).abs() < f64::EPSILON);
        assert!((bounds.x1 - 10.0).abs() < f64::EPSILON);
        assert!((bounds.y1 - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_path_visits_every_point() {
        let stroke = Stroke {
            points: vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0), Point::new(5.0, 5.0)],
        };
        assert_eq!(stroke.to_path().elements().len(), 3);
    }

    #[test]
    fn test_non_finite_rejected() {
        let stroke = Stroke {
            points: vec![Point::new(0.0, 0.0), Point::new(f64::NAN, 1.0)],
        };
        assert!(matches!(stroke.validate(), Err(ShapeError::NonFinite { .. })));
    }
}
