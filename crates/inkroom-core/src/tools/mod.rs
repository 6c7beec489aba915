//! Tool system for the whiteboard.
//!
//! [`ToolManager`] is the input state machine: it consumes pointer events and
//! turns a press-drag-release gesture into at most one outcome, depending on the
//! tool that was active when the gesture started.

use crate::input::{MouseButton, PointerEvent};
use crate::shapes::{Circle, Rectangle, Shape, Stroke};
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// Minimum width and height (inclusive) of a select drag that triggers a capture.
pub const MIN_CAPTURE_SIZE: f64 = 10.0;

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Region capture; never produces a shape.
    Select,
    Rect,
    #[default]
    Circle,
    Pencil,
    Eraser,
}

impl ToolKind {
    /// Whether the tool accumulates every pointer position while dragging.
    pub fn collects_points(self) -> bool {
        matches!(self, ToolKind::Pencil | ToolKind::Eraser)
    }
}

/// State of a tool interaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ToolState {
    /// Waiting for a pointer-down.
    #[default]
    Idle,
    /// The primary button is held.
    Dragging {
        /// Tool captured at pointer-down.
        tool: ToolKind,
        /// Pointer-down position.
        anchor: Point,
        /// Latest pointer position.
        current: Point,
        /// Accumulated stroke, seeded with the anchor (pencil and eraser only).
        points: Option<Vec<Point>>,
    },
}

/// What the in-progress gesture would look like if released now.
#[derive(Debug, Clone, PartialEq)]
pub enum Preview {
    /// A shape that is drawn on top of the committed ones.
    Shape(Shape),
    /// The normalized selection overlay of the select tool.
    Selection(Rect),
}

/// Result of feeding one pointer event to the [`ToolManager`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The event did not apply in the current state.
    Ignored,
    /// A drag began; nothing new to draw yet.
    Started,
    /// The preview changed; the surface needs a repaint.
    Preview,
    /// A finished shape to append and broadcast.
    Committed(Shape),
    /// A select drag large enough to capture; carries the normalized region.
    Captured(Rect),
    /// A select drag below the capture threshold; only the overlay is cleared.
    SelectionCleared,
    /// A stroke with fewer than two points was dropped.
    Discarded,
}

/// Manages the current tool and its state.
#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    current_tool: ToolKind,
    state: ToolState,
}

impl ToolManager {
    /// Create a new tool manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently selected tool.
    pub fn current_tool(&self) -> ToolKind {
        self.current_tool
    }

    /// Current interaction state.
    pub fn state(&self) -> &ToolState {
        &self.state
    }

    /// Select a tool.
    ///
    /// Requests made while a drag is in progress are ignored and return `false`;
    /// the gesture finishes with the tool it started with.
    pub fn set_tool(&mut self, tool: ToolKind) -> bool {
        if self.is_active() {
            log::debug!("Ignoring switch to {:?} during a drag", tool);
            return false;
        }
        self.current_tool = tool;
        true
    }

    /// Check if a drag is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self.state, ToolState::Dragging { .. })
    }

    /// Single entry point for pointer input.
    pub fn handle_pointer_event(&mut self, event: PointerEvent) -> ToolOutcome {
        match event {
            PointerEvent::Down { position, button: MouseButton::Left } => self.begin(position),
            PointerEvent::Move { position } => self.update(position),
            PointerEvent::Up { position, button: MouseButton::Left } => self.end(position),
            PointerEvent::Down { .. } | PointerEvent::Up { .. } => ToolOutcome::Ignored,
        }
    }

    /// Begin a drag at `point`.
    pub fn begin(&mut self, point: Point) -> ToolOutcome {
        if self.is_active() {
            return ToolOutcome::Ignored;
        }
        let tool = self.current_tool;
        self.state = ToolState::Dragging {
            tool,
            anchor: point,
            current: point,
            points: tool.collects_points().then(|| vec![point]),
        };
        ToolOutcome::Started
    }

    /// Move the pointer while the button is held.
    pub fn update(&mut self, point: Point) -> ToolOutcome {
        let ToolState::Dragging { current, points, .. } = &mut self.state else {
            return ToolOutcome::Ignored;
        };
        *current = point;
        if let Some(points) = points {
            push_distinct(points, point);
        }
        ToolOutcome::Preview
    }

    /// Release the button at `point` and finalize the gesture.
    pub fn end(&mut self, point: Point) -> ToolOutcome {
        let ToolState::Dragging { tool, anchor, points, .. } = std::mem::take(&mut self.state) else {
            return ToolOutcome::Ignored;
        };

        match tool {
            ToolKind::Rect => ToolOutcome::Committed(Shape::Rect(Rectangle::from_drag(anchor, point))),
            ToolKind::Circle => ToolOutcome::Committed(Shape::Circle(Circle::from_drag(anchor, point))),
            ToolKind::Pencil | ToolKind::Eraser => {
                let mut points = points.unwrap_or_else(|| vec![anchor]);
                push_distinct(&mut points, point);
                match Stroke::from_points(points) {
                    Some(stroke) if tool == ToolKind::Pencil => ToolOutcome::Committed(Shape::Pencil(stroke)),
                    Some(stroke) => ToolOutcome::Committed(Shape::Eraser(stroke)),
                    None => ToolOutcome::Discarded,
                }
            }
            ToolKind::Select => {
                let region = Rect::from_points(anchor, point).abs();
                if region.width() >= MIN_CAPTURE_SIZE && region.height() >= MIN_CAPTURE_SIZE {
                    ToolOutcome::Captured(region)
                } else {
                    ToolOutcome::SelectionCleared
                }
            }
        }
    }

    /// Abandon the current drag without producing anything.
    pub fn cancel(&mut self) {
        self.state = ToolState::Idle;
    }

    /// Get the preview for the current drag.
    pub fn preview(&self) -> Option<Preview> {
        let ToolState::Dragging { tool, anchor, current, points } = &self.state else {
            return None;
        };
        let (anchor, current) = (*anchor, *current);
        match tool {
            ToolKind::Rect => Some(Preview::Shape(Shape::Rect(Rectangle::from_drag(anchor, current)))),
            ToolKind::Circle => Some(Preview::Shape(Shape::Circle(Circle::from_drag(anchor, current)))),
            ToolKind::Pencil => stroke_preview(points).map(|s| Preview::Shape(Shape::Pencil(s))),
            ToolKind::Eraser => stroke_preview(points).map(|s| Preview::Shape(Shape::Eraser(s))),
            ToolKind::Select => Some(Preview::Selection(Rect::from_points(anchor, current).abs())),
        }
    }
}

/// Append `point` unless it repeats the previous one, so a click that never
/// leaves its anchor collapses to a single point and is discarded.
fn push_distinct(points: &mut Vec<Point>, point: Point) {
    if points.last() != Some(&point) {
        points.push(point);
    }
}

fn stroke_preview(points: &Option<Vec<Point>>) -> Option<Stroke> {
    points.as_ref().and_then(|p| Stroke::from_points(p.clone()))
}
