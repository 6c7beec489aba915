//! Region capture: crop the rendered surface and encode it as PNG.

use crate::raster::RasterRenderer;
use crate::renderer::{RenderResult, RendererError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use kurbo::Rect;

/// A PNG snapshot of part of the surface.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    /// Pixel region actually captured, after normalization and clamping.
    pub region: Rect,
    pub width: u32,
    pub height: u32,
    /// Encoded PNG bytes.
    pub png: Vec<u8>,
}

impl CapturedImage {
    /// `data:image/png;base64,...` form, as sent to the analysis service.
    pub fn to_data_url(&self) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(&self.png))
    }
}

impl RasterRenderer {
    /// Capture the pixels under `region` as it is currently painted.
    ///
    /// The region is normalized (negative extents flip the origin), expanded
    /// to whole pixels and clamped to the surface.
    pub fn capture(&self, region: Rect) -> RenderResult<CapturedImage> {
        let region = region.abs();
        let surface = Rect::new(0.0, 0.0, f64::from(self.width()), f64::from(self.height()));
        let clipped = region.intersect(surface);
        let clipped = Rect::new(
            clipped.x0.floor(),
            clipped.y0.floor(),
            clipped.x1.ceil(),
            clipped.y1.ceil(),
        );
        if !clipped.is_finite() || clipped.width() < 1.0 || clipped.height() < 1.0 {
            return Err(RendererError::EmptyRegion);
        }

        let (x, y) = (clipped.x0 as u32, clipped.y0 as u32);
        let (width, height) = (clipped.width() as u32, clipped.height() as u32);
        let cropped = image::imageops::crop_imm(self.image(), x, y, width, height).to_image();
        let png = encode_png(cropped.as_raw(), width, height)?;
        log::debug!("Captured {}x{} region at ({}, {}): {} bytes", width, height, x, y, png.len());

        Ok(CapturedImage {
            region: clipped,
            width,
            height,
            png,
        })
    }
}

/// Encode RGBA pixel data to PNG bytes.
pub fn encode_png(rgba_data: &[u8], width: u32, height: u32) -> RenderResult<Vec<u8>> {
    let mut png_data = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut png_data, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);

        let mut writer = encoder
            .write_header()
            .map_err(|e| RendererError::Encode(e.to_string()))?;
        writer
            .write_image_data(rgba_data)
            .map_err(|e| RendererError::Encode(e.to_string()))?;
    }
    Ok(png_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{RenderContext, Renderer};
    use inkroom_core::shapes::{Rectangle, Shape};
    use kurbo::Point;

    fn painted(width: u32, height: u32, shapes: &[Shape]) -> RasterRenderer {
        let mut renderer = RasterRenderer::new(width, height);
        renderer.render(&RenderContext::new(shapes, renderer.size()));
        renderer
    }

    #[test]
    fn test_capture_normalizes_reverse_drag() {
        let renderer = painted(100, 100, &[]);
        let captured = renderer.capture(Rect::new(60.0, 40.0, 20.0, 30.0)).unwrap();
        assert_eq!(captured.region, Rect::new(20.0, 30.0, 60.0, 40.0));
        assert_eq!((captured.width, captured.height), (40, 10));
    }

    #[test]
    fn test_capture_clamped_to_surface() {
        let renderer = painted(50, 50, &[]);
        let captured = renderer.capture(Rect::new(-10.0, 30.0, 80.0, 70.0)).unwrap();
        assert_eq!(captured.region, Rect::new(0.0, 30.0, 50.0, 50.0));
        assert_eq!((captured.width, captured.height), (50, 20));
    }

    #[test]
    fn test_capture_outside_surface_fails() {
        let renderer = painted(50, 50, &[]);
        assert!(matches!(
            renderer.capture(Rect::new(60.0, 60.0, 90.0, 90.0)),
            Err(RendererError::EmptyRegion)
        ));
    }

    #[test]
    fn test_captured_png_holds_the_pixels() {
        let shapes = [Shape::Rect(Rectangle::new(Point::new(10.0, 10.0), 20.0, 20.0))];
        let renderer = painted(64, 64, &shapes);
        let captured = renderer.capture(Rect::new(5.0, 5.0, 35.0, 35.0)).unwrap();

        let decoded = image::load_from_memory(&captured.png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (30, 30));
        assert_eq!(decoded.get_pixel(5, 15).0, [255, 255, 255, 255]);
        assert_eq!(decoded.get_pixel(15, 15).0, [0, 0, 0, 255]);
        assert_eq!(decoded.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_data_url() {
        let renderer = painted(16, 16, &[]);
        let url = renderer.capture(Rect::new(0.0, 0.0, 16.0, 16.0)).unwrap().to_data_url();
        assert!(url.starts_with("data:image/png;base64,iVBORw0KGgo"));
    }
}
