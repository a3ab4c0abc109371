//! Occlusion
//!
//! Layer-space occlusion handed to a tiling each frame. A tile is occluded
//! when opaque content drawn above the layer covers all of its visible part.

use crate::geometry::{Rect, Region};

/// Opaque coverage above a layer, in the layer's own space
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Occlusion {
    occluders: Region,
}

impl Occlusion {
    /// No occlusion
    pub fn new() -> Self {
        Self::default()
    }

    /// Occlusion made of a single opaque rect
    pub fn from_rect(rect: Rect) -> Self {
        Self { occluders: Region::from_rect(rect) }
    }

    pub fn from_region(region: Region) -> Self {
        Self { occluders: region }
    }

    /// Add an opaque rect above the layer
    pub fn add_occluder(&mut self, rect: Rect) {
        self.occluders.union_rect(rect);
    }

    pub fn has_occlusion(&self) -> bool {
        !self.occluders.is_empty()
    }

    /// True if `layer_rect` is completely hidden
    pub fn is_occluded(&self, layer_rect: &Rect) -> bool {
        if layer_rect.is_empty() || !self.has_occlusion() {
            return false;
        }
        self.occluders.contains_rect(layer_rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_occlusion() {
        let occlusion = Occlusion::new();
        assert!(!occlusion.has_occlusion());
        assert!(!occlusion.is_occluded(&Rect::new(0, 0, 10, 10)));
    }

    #[test]
    fn test_partial_cover_is_not_occluded() {
        let occlusion = Occlusion::from_rect(Rect::new(0, 0, 100, 100));
        assert!(occlusion.is_occluded(&Rect::new(10, 10, 50, 50)));
        assert!(!occlusion.is_occluded(&Rect::new(80, 80, 50, 50)));
    }

    #[test]
    fn test_empty_rect_never_occluded() {
        let occlusion = Occlusion::from_rect(Rect::new(0, 0, 100, 100));
        assert!(!occlusion.is_occluded(&Rect::default()));
    }
}
