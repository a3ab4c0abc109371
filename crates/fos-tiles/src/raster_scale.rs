//! Raster Scale Policy
//!
//! Tracks the ideal scales a layer is drawn at and the raster scale its
//! high-res tiling is actually built at. The raster scale follows the ideal
//! scale except while pinching (it moves in powers of the pinch ratio and
//! snaps to existing tilings) and during transform animations (a single
//! representative scale is picked up front).

use crate::geometry::Size;
use crate::settings::TilingSettings;

/// Per-frame scale inputs for one layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleInputs {
    /// Device, page and transform scale combined
    pub ideal_contents_scale: f32,
    pub device_scale_factor: f32,
    pub page_scale_factor: f32,
    pub min_page_scale_factor: f32,
    pub is_pinching: bool,
    /// Screen-space transform is animating
    pub is_animating: bool,
    /// Largest scale the running animation reaches, if known (0 otherwise)
    pub maximum_animation_contents_scale: f32,
    /// Scale the running animation starts from, if known (0 otherwise)
    pub starting_animation_contents_scale: f32,
    pub device_viewport_size: Size,
}

impl ScaleInputs {
    pub fn new(ideal_contents_scale: f32, device_scale_factor: f32, page_scale_factor: f32) -> Self {
        Self {
            ideal_contents_scale,
            device_scale_factor,
            page_scale_factor,
            ..Self::default()
        }
    }

    pub fn pinching(mut self, is_pinching: bool) -> Self {
        self.is_pinching = is_pinching;
        self
    }

    /// Mark a running transform animation with its known scales
    pub fn animating(mut self, maximum_scale: f32, starting_scale: f32, viewport: Size) -> Self {
        self.is_animating = true;
        self.maximum_animation_contents_scale = maximum_scale;
        self.starting_animation_contents_scale = starting_scale;
        self.device_viewport_size = viewport;
        self
    }
}

impl Default for ScaleInputs {
    fn default() -> Self {
        Self {
            ideal_contents_scale: 1.0,
            device_scale_factor: 1.0,
            page_scale_factor: 1.0,
            min_page_scale_factor: 1.0,
            is_pinching: false,
            is_animating: false,
            maximum_animation_contents_scale: 0.0,
            starting_animation_contents_scale: 0.0,
            device_viewport_size: Size::default(),
        }
    }
}

/// Ideal and raster scales of one layer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RasterScales {
    pub ideal_contents_scale: f32,
    pub ideal_page_scale: f32,
    pub ideal_device_scale: f32,
    pub ideal_source_scale: f32,

    pub raster_contents_scale: f32,
    pub raster_page_scale: f32,
    pub raster_device_scale: f32,
    pub raster_source_scale: f32,
    pub low_res_raster_contents_scale: f32,

    /// The source scale changed outside an animation; stop tracking it
    pub raster_source_scale_is_fixed: bool,
    pub was_animating: bool,
}

impl RasterScales {
    /// No raster scale has been picked yet
    pub fn is_unset(&self) -> bool {
        self.raster_contents_scale == 0.0
    }

    /// Forget raster scales so the next update picks fresh ones
    pub fn reset_raster_scales(&mut self) {
        self.raster_contents_scale = 0.0;
        self.raster_page_scale = 0.0;
        self.raster_device_scale = 0.0;
        self.raster_source_scale = 0.0;
        self.low_res_raster_contents_scale = 0.0;
        self.raster_source_scale_is_fixed = false;
    }

    /// Derive ideal scales from this frame's inputs
    pub fn update_ideal(&mut self, inputs: &ScaleInputs, min_contents_scale: f32) {
        let min_page_scale = if inputs.min_page_scale_factor > 0.0 {
            inputs.min_page_scale_factor
        } else {
            1.0
        };
        let min_source_scale = min_contents_scale / min_page_scale;
        let page_scale = nonzero(inputs.page_scale_factor);
        let device_scale = nonzero(inputs.device_scale_factor);
        let ideal_source_scale = inputs.ideal_contents_scale / page_scale / device_scale;

        self.ideal_contents_scale = inputs.ideal_contents_scale.max(min_contents_scale);
        self.ideal_page_scale = page_scale;
        self.ideal_device_scale = device_scale;
        self.ideal_source_scale = ideal_source_scale.max(min_source_scale);
    }

    /// Whether the raster scale should move this frame
    pub fn should_adjust(&self, inputs: &ScaleInputs, settings: &TilingSettings, min_scale: f32, max_scale: f32) -> bool {
        if self.was_animating != inputs.is_animating {
            return true;
        }
        if inputs.is_animating
            && self.raster_contents_scale != self.ideal_contents_scale
            && settings.rerasterize_during_scale_animation
        {
            return true;
        }

        if inputs.is_pinching && self.raster_page_scale != 0.0 {
            // Zooming out always needs a coarser tiling; zooming in only once
            // the current one is too blurry
            let ratio = self.ideal_page_scale / self.raster_page_scale;
            if self.raster_page_scale > self.ideal_page_scale || ratio > settings.pinch_rescale_ratio {
                return true;
            }
        }
        if !inputs.is_pinching && self.raster_page_scale != self.ideal_page_scale {
            return true;
        }

        if self.raster_device_scale != self.ideal_device_scale {
            return true;
        }
        if !inputs.is_animating
            && !self.raster_source_scale_is_fixed
            && self.raster_source_scale != self.ideal_source_scale
        {
            return true;
        }

        self.raster_contents_scale > max_scale || self.raster_contents_scale < min_scale
    }

    /// Pick new raster scales.
    ///
    /// `snap` maps a desired scale onto an existing tiling's scale when one is
    /// close enough; `tile_size_for` sizes tiles for given content bounds.
    pub fn recalculate(
        &mut self,
        inputs: &ScaleInputs,
        settings: &TilingSettings,
        layer_bounds: Size,
        (min_scale, max_scale): (f32, f32),
        snap: impl Fn(f32) -> f32,
        tile_size_for: impl Fn(Size) -> Size,
    ) {
        let old_raster_contents_scale = self.raster_contents_scale;
        let old_raster_page_scale = self.raster_page_scale;
        let old_raster_source_scale = self.raster_source_scale;

        self.raster_device_scale = self.ideal_device_scale;
        self.raster_page_scale = self.ideal_page_scale;
        self.raster_source_scale = self.ideal_source_scale;
        self.raster_contents_scale = self.ideal_contents_scale;

        if old_raster_source_scale != 0.0
            && !inputs.is_animating
            && !self.was_animating
            && old_raster_source_scale != self.ideal_source_scale
        {
            self.raster_source_scale_is_fixed = true;
        }
        if self.raster_source_scale_is_fixed {
            self.raster_contents_scale /= self.raster_source_scale;
            self.raster_source_scale = 1.0;
        }

        // Stepping needs a ratio above one; otherwise track the ideal scale
        let ratio = settings.pinch_rescale_ratio;
        if inputs.is_pinching && old_raster_contents_scale != 0.0 && ratio > 1.0 {
            let zooming_out = old_raster_page_scale > self.ideal_page_scale;
            let mut desired = old_raster_contents_scale;
            if zooming_out {
                while desired > self.ideal_contents_scale {
                    desired /= ratio;
                }
            } else {
                while desired < self.ideal_contents_scale {
                    desired *= ratio;
                }
            }
            self.raster_contents_scale = snap(desired);
            self.raster_page_scale = old_raster_page_scale * self.raster_contents_scale / old_raster_contents_scale;
        }

        if inputs.is_animating && !settings.rerasterize_during_scale_animation {
            self.raster_contents_scale = self.animation_raster_scale(inputs, layer_bounds);
        }

        self.raster_contents_scale = self.raster_contents_scale.max(min_scale).min(max_scale);

        let raster_bounds = layer_bounds.scale_to_ceiled(self.raster_contents_scale);
        let tile_size = tile_size_for(raster_bounds);
        let tile_covers_bounds = tile_size.width >= raster_bounds.width && tile_size.height >= raster_bounds.height;
        self.low_res_raster_contents_scale = if tile_size.is_empty() || tile_covers_bounds {
            self.raster_contents_scale
        } else {
            (self.raster_contents_scale * settings.low_res_contents_scale_factor).max(min_scale)
        };

        tracing::debug!(
            raster_contents_scale = self.raster_contents_scale,
            low_res_raster_contents_scale = self.low_res_raster_contents_scale,
            ideal_contents_scale = self.ideal_contents_scale,
            pinching = inputs.is_pinching,
            animating = inputs.is_animating,
            "recalculated raster scales"
        );
    }

    /// Representative scale for an animation that is not re-rastered per frame
    fn animation_raster_scale(&self, inputs: &ScaleInputs, layer_bounds: Size) -> f32 {
        let viewport_area = inputs.device_viewport_size.area();
        let fits_viewport = |scale: f32| layer_bounds.scale_to_ceiled(scale).area() <= viewport_area;

        let starting = inputs.starting_animation_contents_scale;
        let maximum = inputs.maximum_animation_contents_scale;
        if starting > 0.0 && fits_viewport(starting) {
            return starting;
        }
        if maximum > 0.0 && fits_viewport(maximum) {
            return maximum;
        }
        self.ideal_page_scale * self.ideal_device_scale
    }
}

fn nonzero(scale: f32) -> f32 {
    if scale > 0.0 && scale.is_finite() { scale } else { 1.0 }
}

/// Ratio of the larger to the smaller of two scales
pub fn larger_ratio(a: f32, b: f32) -> f32 {
    if a > b { a / b } else { b / a }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TilingSettings {
        TilingSettings::default()
    }

    fn recalc(scales: &mut RasterScales, inputs: &ScaleInputs) {
        scales.update_ideal(inputs, 0.0625);
        scales.recalculate(
            inputs,
            &settings(),
            Size::new(1000, 1000),
            (0.0625, 1000.0),
            |scale| scale,
            |_| Size::new(256, 256),
        );
        scales.was_animating = inputs.is_animating;
    }

    #[test]
    fn test_tracks_ideal_scale() {
        let mut scales = RasterScales::default();
        recalc(&mut scales, &ScaleInputs::new(2.0, 1.0, 2.0));
        assert_eq!(scales.raster_contents_scale, 2.0);
        assert_eq!(scales.low_res_raster_contents_scale, 0.5);
    }

    #[test]
    fn test_single_tile_layer_has_no_low_res() {
        let mut scales = RasterScales::default();
        let inputs = ScaleInputs::new(1.0, 1.0, 1.0);
        scales.update_ideal(&inputs, 0.0625);
        scales.recalculate(&inputs, &settings(), Size::new(100, 100), (0.0625, 1000.0), |s| s, |_| Size::new(128, 128));
        assert_eq!(scales.low_res_raster_contents_scale, scales.raster_contents_scale);
    }

    #[test]
    fn test_should_adjust_when_page_scale_changes() {
        let mut scales = RasterScales::default();
        recalc(&mut scales, &ScaleInputs::new(1.0, 1.0, 1.0));

        let same = ScaleInputs::new(1.0, 1.0, 1.0);
        scales.update_ideal(&same, 0.0625);
        assert!(!scales.should_adjust(&same, &settings(), 0.0625, 1000.0));

        let zoomed = ScaleInputs::new(1.5, 1.0, 1.5);
        scales.update_ideal(&zoomed, 0.0625);
        assert!(scales.should_adjust(&zoomed, &settings(), 0.0625, 1000.0));
    }

    #[test]
    fn test_pinch_zoom_in_within_ratio_keeps_scale() {
        let mut scales = RasterScales::default();
        recalc(&mut scales, &ScaleInputs::new(1.0, 1.0, 1.0));

        let pinch = ScaleInputs::new(1.8, 1.0, 1.8).pinching(true);
        scales.update_ideal(&pinch, 0.0625);
        assert!(!scales.should_adjust(&pinch, &settings(), 0.0625, 1000.0));
    }

    #[test]
    fn test_pinch_zoom_out_halves_scale() {
        let mut scales = RasterScales::default();
        recalc(&mut scales, &ScaleInputs::new(2.0, 1.0, 2.0));

        let pinch = ScaleInputs::new(1.8, 1.0, 1.8).pinching(true);
        scales.update_ideal(&pinch, 0.0625);
        assert!(scales.should_adjust(&pinch, &settings(), 0.0625, 1000.0));
        recalc(&mut scales, &pinch);
        assert_eq!(scales.raster_contents_scale, 1.0);
    }

    #[test]
    fn test_pinch_without_usable_ratio_tracks_ideal() {
        for ratio in [1.0, 0.5, 0.0, f32::NAN] {
            let settings = TilingSettings {
                pinch_rescale_ratio: ratio,
                ..TilingSettings::default()
            };
            let mut scales = RasterScales::default();
            recalc(&mut scales, &ScaleInputs::new(1.0, 1.0, 1.0));

            let pinch = ScaleInputs::new(0.3, 1.0, 0.3).pinching(true);
            scales.update_ideal(&pinch, 0.0625);
            scales.recalculate(&pinch, &settings, Size::new(1000, 1000), (0.0625, 1000.0), |s| s, |_| Size::new(256, 256));
            assert_eq!(scales.raster_contents_scale, 0.3);
        }
    }

    #[test]
    fn test_animation_prefers_starting_scale_that_fits() {
        let mut scales = RasterScales::default();
        let inputs = ScaleInputs::new(3.0, 1.0, 1.0).animating(4.0, 0.5, Size::new(800, 800));
        recalc(&mut scales, &inputs);
        assert_eq!(scales.raster_contents_scale, 0.5);
    }

    #[test]
    fn test_animation_falls_back_to_unit_scale() {
        let mut scales = RasterScales::default();
        let inputs = ScaleInputs::new(3.0, 1.0, 1.0).animating(4.0, 2.0, Size::new(800, 800));
        recalc(&mut scales, &inputs);
        assert_eq!(scales.raster_contents_scale, 1.0);
    }

    #[test]
    fn test_larger_ratio() {
        assert_eq!(larger_ratio(2.0, 1.0), 2.0);
        assert_eq!(larger_ratio(1.0, 2.0), 2.0);
    }
}
