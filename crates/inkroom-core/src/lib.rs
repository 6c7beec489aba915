//! InkRoom Core Library
//!
//! Platform-agnostic core of the InkRoom collaborative whiteboard: the shape
//! model, the pointer-driven tool state machine and the relay wire protocol.

pub mod input;
pub mod protocol;
pub mod shapes;
pub mod tools;

pub use input::{MouseButton, PointerEvent};
pub use protocol::{
    ClientMessage, Inbound, ProtocolError, RelayMessage, ShapeEnvelope, decode_shape, encode_shape,
    parse_relay_message,
};
pub use shapes::{Circle, Rectangle, Shape, ShapeError, ShapeKind, ShapeTrait, Stroke};
pub use tools::{MIN_CAPTURE_SIZE, Preview, ToolKind, ToolManager, ToolOutcome, ToolState};
