//! Raster Source
//!
//! Recorded layer content that tiles are rastered from. Tilings only ask a
//! raster source for its size and whether it covers a rect; the raster
//! workers ask it for solid-color analysis and playback.

use crate::geometry::{Rect, Size};
use crate::Color;

/// Recorded content for one layer
pub trait RasterSource: Send + Sync + std::fmt::Debug {
    /// Layer bounds
    fn size(&self) -> Size;

    /// True if the recording covers `layer_rect` (clipped to the bounds)
    fn covers_rect(&self, layer_rect: &Rect) -> bool;

    /// Single color covering the content rect at `contents_scale`, if any
    fn perform_solid_color_analysis(&self, content_rect: &Rect, contents_scale: f32) -> Option<Color>;

    /// Draw `content_rect` at `contents_scale` into `pixmap`, whose origin
    /// maps to the rect's top-left corner
    fn playback_to_pixmap(&self, pixmap: &mut tiny_skia::Pixmap, content_rect: &Rect, contents_scale: f32);

    /// Solid color of the whole layer, if any
    fn solid_color(&self) -> Option<Color> {
        self.perform_solid_color_analysis(&Rect::from_size(self.size()), 1.0)
    }
}

/// A recorded display list of opaque or translucent color rects
#[derive(Debug, Clone)]
pub struct RecordedRasterSource {
    size: Size,
    recorded_viewport: Rect,
    background: Color,
    items: Vec<(Rect, Color)>,
}

impl RecordedRasterSource {
    /// Fully recorded, transparent content of the given size
    pub fn new(size: Size) -> Self {
        Self {
            size,
            recorded_viewport: Rect::from_size(size),
            background: Color::TRANSPARENT,
            items: Vec::new(),
        }
    }

    /// Content that is a single color everywhere
    pub fn solid(size: Size, color: Color) -> Self {
        Self::new(size).with_background(color)
    }

    pub fn with_background(mut self, color: Color) -> Self {
        self.background = color;
        self
    }

    /// Restrict the recorded part of the layer
    pub fn with_recorded_viewport(mut self, viewport: Rect) -> Self {
        self.recorded_viewport = viewport;
        self
    }

    /// Record a filled rect in layer space
    pub fn push_rect(&mut self, rect: Rect, color: Color) {
        self.items.push((rect, color));
    }

    pub fn recorded_viewport(&self) -> Rect {
        self.recorded_viewport
    }
}

impl RasterSource for RecordedRasterSource {
    fn size(&self) -> Size {
        self.size
    }

    fn covers_rect(&self, layer_rect: &Rect) -> bool {
        if self.size.is_empty() {
            return false;
        }
        let bounded = layer_rect.intersect(&Rect::from_size(self.size));
        self.recorded_viewport.contains(&bounded)
    }

    fn perform_solid_color_analysis(&self, content_rect: &Rect, contents_scale: f32) -> Option<Color> {
        let layer_rect = content_rect
            .scale_to_enclosing(1.0 / contents_scale)
            .intersect(&Rect::from_size(self.size));
        if layer_rect.is_empty() {
            return None;
        }

        // Topmost item touching the rect decides
        match self.items.iter().rev().find(|(rect, _)| rect.intersects(&layer_rect)) {
            Some((rect, color)) if color.is_opaque() && rect.contains(&layer_rect) => Some(*color),
            Some(_) => None,
            None => Some(self.background),
        }
    }

    fn playback_to_pixmap(&self, pixmap: &mut tiny_skia::Pixmap, content_rect: &Rect, contents_scale: f32) {
        pixmap.fill(to_skia_color(self.background));

        let transform = tiny_skia::Transform::from_scale(contents_scale, contents_scale)
            .post_translate(-content_rect.x as f32, -content_rect.y as f32);
        let layer_rect = content_rect.scale_to_enclosing(1.0 / contents_scale);

        for (rect, color) in &self.items {
            if !rect.intersects(&layer_rect) {
                continue;
            }
            let Some(skia_rect) =
                tiny_skia::Rect::from_xywh(rect.x as f32, rect.y as f32, rect.width as f32, rect.height as f32)
            else {
                continue;
            };
            let mut paint = tiny_skia::Paint::default();
            paint.set_color(to_skia_color(*color));
            paint.anti_alias = false;
            pixmap.fill_rect(skia_rect, &paint, transform, None);
        }
    }
}

fn to_skia_color(color: Color) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba8(color.r, color.g, color.b, color.a)
}
