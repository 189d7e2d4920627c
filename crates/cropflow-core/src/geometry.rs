//! Display-space to raster-space crop geometry.
//!
//! The interactive view reports the crop rectangle and the bounding box of the
//! displayed image in display coordinates, together with the display-to-raster
//! scale and the rotation applied on screen. This module turns that snapshot
//! into an integer pixel region and decides whether a pixel-level crop is
//! needed at all.
//!
//! # Coordinate System
//!
//! - Origin is the top-left corner, y grows downwards
//! - Angles are in degrees, positive = clockwise on screen
//! - Rounding is half-up (`floor(x + 0.5)`), also for negative values

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when the geometric state is inconsistent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// The displayed image rectangle has no area.
    #[error("Current image rectangle is empty: {0:?}")]
    EmptyImageRect(Rect),

    /// The display-to-raster scale is zero, negative or not finite.
    #[error("Invalid display scale: {0}")]
    InvalidScale(f32),

    /// The crop region does not fit into the raster.
    #[error(
        "Crop region [{x}, {y}, {width}x{height}] is outside the {raster_width}x{raster_height} raster"
    )]
    OutOfBounds {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        raster_width: u32,
        raster_height: u32,
    },
}

/// Axis-aligned rectangle in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// True when the rectangle has no area.
    pub fn is_empty(&self) -> bool {
        !(self.left < self.right && self.top < self.bottom)
    }
}

/// Snapshot of the interactive view at the moment a crop is requested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageState {
    /// User-selected region.
    pub crop_rect: Rect,
    /// Bounding box of the whole image as currently displayed.
    pub current_image_rect: Rect,
    /// Display units per raster pixel.
    pub current_scale: f32,
    /// Rotation currently applied in the view, in degrees.
    pub current_angle: f32,
}

impl ImageState {
    pub fn new(
        crop_rect: Rect,
        current_image_rect: Rect,
        current_scale: f32,
        current_angle: f32,
    ) -> Self {
        Self {
            crop_rect,
            current_image_rect,
            current_scale,
            current_angle,
        }
    }

    /// Reject states that cannot be mapped onto a raster.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.current_image_rect.is_empty() {
            return Err(GeometryError::EmptyImageRect(self.current_image_rect));
        }
        if !self.current_scale.is_finite() || self.current_scale <= 0.0 {
            return Err(GeometryError::InvalidScale(self.current_scale));
        }
        Ok(())
    }

    /// Crop size in raster pixels before rounding.
    pub fn crop_size_in_raster(&self) -> (f32, f32) {
        (
            self.crop_rect.width() / self.current_scale,
            self.crop_rect.height() / self.current_scale,
        )
    }

    /// Uniform downscale factor that fits the crop into the given bounds.
    ///
    /// Returns `None` when no bound is configured (either is zero) or when the
    /// crop already fits. The factor is always below 1.
    pub fn downscale_factor(&self, max_width: u32, max_height: u32) -> Option<f32> {
        if max_width == 0 || max_height == 0 {
            return None;
        }

        let (crop_width, crop_height) = self.crop_size_in_raster();
        if crop_width <= max_width as f32 && crop_height <= max_height as f32 {
            return None;
        }

        let scale_x = max_width as f32 / crop_width;
        let scale_y = max_height as f32 / crop_height;
        Some(scale_x.min(scale_y))
    }

    /// Integer pixel region for the current scale.
    pub fn resolve_region(&self) -> CropRegion {
        let crop = &self.crop_rect;
        let image = &self.current_image_rect;
        let scale = self.current_scale;

        CropRegion {
            offset_x: round_half_up((crop.left - image.left) / scale),
            offset_y: round_half_up((crop.top - image.top) / scale),
            width: round_half_up(crop.width() / scale),
            height: round_half_up(crop.height() / scale),
        }
    }

    /// Decide between a pixel-level crop and a plain file copy.
    ///
    /// A crop is required when a size bound is configured, the view is
    /// rotated, or any edge of the crop rectangle is further than the rounding
    /// tolerance from the displayed image edge.
    pub fn should_crop(&self, region: &CropRegion, size_bounded: bool) -> bool {
        let tolerance = region.tolerance() as f32;
        let crop = &self.crop_rect;
        let image = &self.current_image_rect;

        size_bounded
            || self.current_angle != 0.0
            || (crop.left - image.left).abs() > tolerance
            || (crop.top - image.top).abs() > tolerance
            || (crop.right - image.right).abs() > tolerance
            || (crop.bottom - image.bottom).abs() > tolerance
    }
}

/// Crop region in raster pixel coordinates.
///
/// Values are signed: an inconsistent view state can produce negative offsets,
/// which the crop stage only absorbs up to [`CropRegion::tolerance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub offset_x: i32,
    pub offset_y: i32,
    pub width: i32,
    pub height: i32,
}

impl CropRegion {
    /// Pixel error allowed for matrix rounding: one pixel plus one per
    /// thousand pixels of the longer side.
    pub fn tolerance(&self) -> i32 {
        let longest = self.width.max(self.height).max(0);
        1 + round_half_up(longest as f32 / 1000.0)
    }
}

/// Round half-up, matching `floor(x + 0.5)`.
#[inline]
pub fn round_half_up(value: f32) -> i32 {
    (value + 0.5).floor() as i32
}


// ============================================================================
// Property-Based Tests
// ============================================================================
