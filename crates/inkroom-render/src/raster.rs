//! CPU raster backend.
//!
//! Paths are flattened to polylines and stroked by stamping discs along each
//! segment, which gives round caps and joins for free.

use crate::renderer::{
    ERASER_WIDTH, OUTLINE_WIDTH, PENCIL_WIDTH, RenderContext, Renderer, SELECTION_DASH, SELECTION_WIDTH,
};
use image::{Rgba, RgbaImage};
use inkroom_core::shapes::Shape;
use inkroom_core::tools::Preview;
use kurbo::{PathEl, Point, Rect, Shape as KurboShape, Size};
use peniko::Color;

/// Tolerance used when flattening curves to line segments.
const FLATTEN_TOLERANCE: f64 = 0.25;

/// Renderer that paints into an in-memory RGBA buffer.
pub struct RasterRenderer {
    image: RgbaImage,
}

impl RasterRenderer {
    /// Create a renderer with a surface of the given size in pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    /// Reallocate the surface. Previous pixels are discarded; the caller is
    /// expected to render again.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.image.width() == width && self.image.height() == height {
            return;
        }
        log::debug!("Resizing raster surface to {}x{}", width, height);
        self.image = RgbaImage::new(width, height);
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> Size {
        Size::new(f64::from(self.image.width()), f64::from(self.image.height()))
    }

    /// Borrow the current pixels.
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Read one pixel, or `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.image.get_pixel_checked(x, y).map(|p| p.0)
    }

    fn clear(&mut self, color: Rgba<u8>) {
        for pixel in self.image.pixels_mut() {
            *pixel = color;
        }
    }

    fn draw_shape(&mut self, shape: &Shape, ctx: &RenderContext) {
        let ink = to_rgba(ctx.stroke_color);
        match shape {
            Shape::Rect(_) | Shape::Circle(_) => {
                self.stroke_path(shape.to_path(), ink, OUTLINE_WIDTH);
            }
            Shape::Pencil(_) => self.stroke_path(shape.to_path(), ink, PENCIL_WIDTH),
            Shape::Eraser(_) => {
                let background = to_rgba(ctx.background_color);
                self.stroke_path(shape.to_path(), background, ERASER_WIDTH);
            }
        }
    }

    fn draw_selection(&mut self, region: Rect, ctx: &RenderContext) {
        let region = region.abs();
        let fill = to_rgba(ctx.selection_fill);
        let (w, h) = (self.image.width(), self.image.height());
        let x0 = region.x0.max(0.0).round() as u32;
        let y0 = region.y0.max(0.0).round() as u32;
        let x1 = (region.x1.max(0.0).round() as u32).min(w);
        let y1 = (region.y1.max(0.0).round() as u32).min(h);
        for y in y0..y1 {
            for x in x0..x1 {
                let dst = *self.image.get_pixel(x, y);
                self.image.put_pixel(x, y, blend_pixel(dst, fill));
            }
        }

        let outline = kurbo::dash(region.path_elements(FLATTEN_TOLERANCE), 0.0, &SELECTION_DASH);
        self.stroke_path(outline, to_rgba(ctx.selection_color), SELECTION_WIDTH);
    }

    /// Stroke a path by stamping discs along its flattened segments.
    ///
    /// Opaque ink is written straight to the surface. Translucent ink is
    /// gathered into a coverage mask first so overlapping stamps blend once.
    fn stroke_path(&mut self, path: impl IntoIterator<Item = PathEl>, color: Rgba<u8>, width: f64) {
        let size = (self.image.width(), self.image.height());
        let mut coverage = (color[3] < 255).then(|| vec![false; size.0 as usize * size.1 as usize]);
        let image = &mut self.image;
        let mut plot = |x: u32, y: u32| match coverage.as_mut() {
            Some(mask) => mask[y as usize * size.0 as usize + x as usize] = true,
            None => image.put_pixel(x, y, color),
        };

        let radius = width / 2.0;
        let mut start: Option<Point> = None;
        let mut last: Option<Point> = None;
        kurbo::flatten(path, FLATTEN_TOLERANCE, |el| match el {
            PathEl::MoveTo(p) => {
                draw_disc(size, p, radius, &mut plot);
                start = Some(p);
                last = Some(p);
            }
            PathEl::LineTo(p) => {
                if let Some(from) = last {
                    draw_thick_line(size, from, p, radius, &mut plot);
                }
                last = Some(p);
            }
            PathEl::ClosePath => {
                if let (Some(from), Some(to)) = (last, start) {
                    draw_thick_line(size, from, to, radius, &mut plot);
                }
                last = start;
            }
            _ => {}
        });

        if let Some(mask) = coverage {
            let width = size.0 as usize;
            for (i, _) in mask.iter().enumerate().filter(|(_, hit)| **hit) {
                let (x, y) = ((i % width) as u32, (i / width) as u32);
                let dst = *self.image.get_pixel(x, y);
                self.image.put_pixel(x, y, blend_pixel(dst, color));
            }
        }
    }
}

impl Renderer for RasterRenderer {
    fn render(&mut self, ctx: &RenderContext) {
        self.clear(to_rgba(self.background_color(ctx)));

        for shape in ctx.shapes {
            self.draw_shape(shape, ctx);
        }

        match ctx.preview {
            Some(Preview::Shape(shape)) => self.draw_shape(shape, ctx),
            Some(Preview::Selection(region)) => self.draw_selection(*region, ctx),
            None => {}
        }
    }
}

fn to_rgba(color: Color) -> Rgba<u8> {
    let c = color.to_rgba8();
    Rgba([c.r, c.g, c.b, c.a])
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    if src[3] == 255 {
        return src;
    }
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| (f64::from(d) * inv + f64::from(s) * a).round().clamp(0.0, 255.0) as u8;
    let out_a = (f64::from(dst[3]) * inv + f64::from(src[3])).round().clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), out_a])
}

/// Call `plot` for every surface pixel inside the disc.
fn draw_disc(size: (u32, u32), center: Point, radius: f64, plot: &mut impl FnMut(u32, u32)) {
    let (w, h) = (i64::from(size.0), i64::from(size.1));
    if w == 0 || h == 0 || !center.is_finite() {
        return;
    }
    let (min_x, max_x) = ((center.x - radius).floor() as i64, (center.x + radius).ceil() as i64);
    let (min_y, max_y) = ((center.y - radius).floor() as i64, (center.y + radius).ceil() as i64);
    if max_x < 0 || max_y < 0 || min_x >= w || min_y >= h {
        return;
    }
    let (min_x, max_x) = (min_x.max(0), max_x.min(w - 1));
    let (min_y, max_y) = (min_y.max(0), max_y.min(h - 1));
    let r2 = radius * radius;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = x as f64 - center.x;
            let dy = y as f64 - center.y;
            if dx * dx + dy * dy <= r2 {
                plot(x as u32, y as u32);
            }
        }
    }
}

/// Stamp discs along the part of the segment that can touch the surface.
fn draw_thick_line(size: (u32, u32), from: Point, to: Point, radius: f64, plot: &mut impl FnMut(u32, u32)) {
    let radius = radius.max(0.6);
    let pad = radius + 1.0;
    let bounds = Rect::new(-pad, -pad, f64::from(size.0) + pad, f64::from(size.1) + pad);
    let Some((from, to)) = clip_segment(from, to, bounds) else {
        return;
    };
    let steps = (to - from).hypot().max(1.0).ceil() as u32;
    for step in 0..=steps {
        let p = from.lerp(to, f64::from(step) / f64::from(steps));
        draw_disc(size, p, radius, &mut *plot);
    }
}

/// Liang-Barsky clip of a segment against `bounds`. `None` if it misses.
fn clip_segment(from: Point, to: Point, bounds: Rect) -> Option<(Point, Point)> {
    let d = to - from;
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [
        (-d.x, from.x - bounds.x0),
        (d.x, bounds.x1 - from.x),
        (-d.y, from.y - bounds.y0),
        (d.y, bounds.y1 - from.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((from.lerp(to, t0), from.lerp(to, t1)))
}
