//! Renderer trait abstraction.

use inkroom_core::shapes::Shape;
use inkroom_core::tools::Preview;
use kurbo::Size;
use peniko::Color;
use thiserror::Error;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Capture region does not overlap the surface")]
    EmptyRegion,
    #[error("PNG encoding failed: {0}")]
    Encode(String),
    #[error("Surface error: {0}")]
    Surface(String),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RendererError>;

/// Stroke width of rectangle and circle outlines.
pub const OUTLINE_WIDTH: f64 = 2.0;
/// Stroke width of pencil strokes.
pub const PENCIL_WIDTH: f64 = 2.0;
/// Stroke width of eraser strokes.
pub const ERASER_WIDTH: f64 = 8.0;
/// Stroke width of the selection outline.
pub const SELECTION_WIDTH: f64 = 2.0;
/// Dash pattern of the selection outline.
pub const SELECTION_DASH: [f64; 2] = [5.0, 5.0];

/// Context for a single render frame.
pub struct RenderContext<'a> {
    /// Committed shapes in commit order.
    pub shapes: &'a [Shape],
    /// In-progress gesture, drawn above the committed shapes.
    pub preview: Option<&'a Preview>,
    /// Viewport size in pixels.
    pub viewport_size: Size,
    /// Background color; erasers paint with it too.
    pub background_color: Color,
    /// Ink color for outlines and pencil strokes.
    pub stroke_color: Color,
    /// Selection outline color.
    pub selection_color: Color,
    /// Selection fill color.
    pub selection_fill: Color,
}

impl<'a> RenderContext<'a> {
    /// Create a new render context.
    pub fn new(shapes: &'a [Shape], viewport_size: Size) -> Self {
        Self {
            shapes,
            preview: None,
            viewport_size,
            background_color: Color::from_rgba8(0, 0, 0, 255),
            stroke_color: Color::from_rgba8(255, 255, 255, 255),
            selection_color: Color::from_rgba8(0, 150, 255, 204),
            selection_fill: Color::from_rgba8(0, 150, 255, 26),
        }
    }

    /// Set the in-progress preview.
    pub fn with_preview(mut self, preview: Option<&'a Preview>) -> Self {
        self.preview = preview;
        self
    }

    /// Set the background color.
    pub fn with_background(mut self, color: Color) -> Self {
        self.background_color = color;
        self
    }

    /// Set the ink color.
    pub fn with_stroke_color(mut self, color: Color) -> Self {
        self.stroke_color = color;
        self
    }

    /// Set the selection outline and fill colors.
    pub fn with_selection_colors(mut self, outline: Color, fill: Color) -> Self {
        self.selection_color = outline;
        self.selection_fill = fill;
        self
    }
}

/// Trait for rendering backends.
pub trait Renderer {
    /// Repaint the whole surface from the context.
    ///
    /// Rendering is a pure function of the context: calling it twice with the
    /// same context produces the same pixels.
    fn render(&mut self, ctx: &RenderContext);

    /// Get the background color (for clearing).
    fn background_color(&self, ctx: &RenderContext) -> Color {
        ctx.background_color
    }
}
