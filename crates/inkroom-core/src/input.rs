//! Pointer input events.

use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Pointer event in canvas-local coordinates.
///
/// Hosts translate their native events (mouse, touch, pen) into this form
/// after subtracting the canvas origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointerEvent {
    Down {
        position: Point,
        button: MouseButton,
    },
    Move {
        position: Point,
    },
    Up {
        position: Point,
        button: MouseButton,
    },
}

impl PointerEvent {
    /// Primary-button press at `position`.
    pub fn down(x: f64, y: f64) -> Self {
        PointerEvent::Down {
            position: Point::new(x, y),
            button: MouseButton::Left,
        }
    }

    /// Pointer movement to `position`.
    pub fn moved(x: f64, y: f64) -> Self {
        PointerEvent::Move {
            position: Point::new(x, y),
        }
    }

    /// Primary-button release at `position`.
    pub fn up(x: f64, y: f64) -> Self {
        PointerEvent::Up {
            position: Point::new(x, y),
            button: MouseButton::Left,
        }
    }

    pub fn position(&self) -> Point {
        match *self {
            PointerEvent::Down { position, .. }
            | PointerEvent::Move { position }
            | PointerEvent::Up { position, .. } => position,
        }
    }

    /// Translate a client-space position into canvas-local coordinates.
    pub fn to_canvas_local(self, canvas_origin: Point) -> Self {
        let offset = canvas_origin.to_vec2();
        match self {
            PointerEvent::Down { position, button } => PointerEvent::Down {
                position: position - offset,
                button,
            },
            PointerEvent::Move { position } => PointerEvent::Move {
                position: position - offset,
            },
            PointerEvent::Up { position, button } => PointerEvent::Up {
                position: position - offset,
                button,
            },
        }
    }
}
