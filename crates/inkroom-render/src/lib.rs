//! InkRoom Render Library
//!
//! Renderer abstraction for InkRoom and a CPU raster implementation whose
//! pixels can be read back for region capture.

mod capture;
mod raster;
mod renderer;

pub use capture::{CapturedImage, encode_png};
pub use raster::RasterRenderer;
pub use renderer::{
    ERASER_WIDTH, OUTLINE_WIDTH, PENCIL_WIDTH, RenderContext, RenderResult, Renderer, RendererError,
    SELECTION_DASH, SELECTION_WIDTH,
};
