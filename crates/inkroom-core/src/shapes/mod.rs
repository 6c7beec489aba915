//! Shape definitions for the whiteboard.
//!
//! Every shape travels over the relay and through the history store as a JSON
//! object tagged by `"type"`, so the enum below is the single source of truth for
//! the wire representation of a drawable primitive.

mod circle;
mod rectangle;
mod stroke;

pub use circle::Circle;
pub use rectangle::Rectangle;
pub use stroke::Stroke;

use kurbo::{BezPath, Point, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a shape fails validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShapeError {
    #[error("{kind} stroke needs at least 2 points, got {len}")]
    DegenerateStroke { kind: ShapeKind, len: usize },
    #[error("{kind} has a non-finite coordinate")]
    NonFinite { kind: ShapeKind },
}

/// Discriminant of a [`Shape`], without its geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Rect,
    Circle,
    Pencil,
    Eraser,
}

impl ShapeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ShapeKind::Rect => "rect",
            ShapeKind::Circle => "circle",
            ShapeKind::Pencil => "pencil",
            ShapeKind::Eraser => "eraser",
        }
    }
}

impl std::fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common trait for all shape geometries.
pub trait ShapeTrait {
    /// Get the normalized bounding box in canvas coordinates.
    fn bounds(&self) -> Rect;

    /// Get the path representation for rendering.
    fn to_path(&self) -> BezPath;

    /// Check structural invariants of the geometry.
    fn validate(&self) -> Result<(), ShapeError>;
}

/// A committed drawable primitive.
///
/// Shapes are immutable once appended to a session's canonical list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Rect(Rectangle),
    Circle(Circle),
    Pencil(Stroke),
    /// Same geometry as a pencil stroke, painted in the background color.
    Eraser(Stroke),
}

impl Shape {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Shape::Rect(_) => ShapeKind::Rect,
            Shape::Circle(_) => ShapeKind::Circle,
            Shape::Pencil(_) => ShapeKind::Pencil,
            Shape::Eraser(_) => ShapeKind::Eraser,
        }
    }

    pub fn bounds(&self) -> Rect {
        match self {
            Shape::Rect(s) => s.bounds(),
            Shape::Circle(s) => s.bounds(),
            Shape::Pencil(s) | Shape::Eraser(s) => s.bounds(),
        }
    }

    pub fn to_path(&self) -> BezPath {
        match self {
            Shape::Rect(s) => s.to_path(),
            Shape::Circle(s) => s.to_path(),
            Shape::Pencil(s) | Shape::Eraser(s) => s.to_path(),
        }
    }

    /// Validate the geometry, tagging errors with this shape's kind.
    pub fn validate(&self) -> Result<(), ShapeError> {
        let kind = self.kind();
        let result = match self {
            Shape::Rect(s) => s.validate(),
            Shape::Circle(s) => s.validate(),
            Shape::Pencil(s) | Shape::Eraser(s) => s.validate(),
        };
        result.map_err(|err| match err {
            ShapeError::DegenerateStroke { len, .. } => ShapeError::DegenerateStroke { kind, len },
            ShapeError::NonFinite { .. } => ShapeError::NonFinite { kind },
        })
    }
}

pub(crate) fn is_finite_point(point: Point) -> bool {
    point.x.is_finite() && point.y.is_finite()
}
