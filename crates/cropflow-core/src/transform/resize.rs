//! Uniform raster scaling used by the bounded-output crop path.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::round_half_up;
use crate::WorkingRaster;

/// Errors that can occur while transforming a raster.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// Scale factor is zero, negative or not finite.
    #[error("Invalid scale factor: {0}")]
    InvalidFactor(f32),

    /// The raster's buffer does not match its dimensions.
    #[error("Pixel buffer does not match {width}x{height} raster")]
    BufferMismatch { width: u32, height: u32 },
}

/// Resampling filter for resize operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterType {
    /// Nearest neighbor interpolation (fastest, lowest quality).
    Nearest,
    /// Bilinear interpolation (fast, acceptable quality).
    #[default]
    Bilinear,
    /// Lanczos3 interpolation (slower, highest quality).
    Lanczos3,
}

impl FilterType {
    /// Convert to the image crate's FilterType.
    pub fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            FilterType::Nearest => image::imageops::FilterType::Nearest,
            FilterType::Bilinear => image::imageops::FilterType::Triangle,
            FilterType::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

/// Target dimensions for a uniform scale, rounded half-up and never zero.
pub fn scaled_dimensions(width: u32, height: u32, factor: f32) -> (u32, u32) {
    let scale = |len: u32| round_half_up(len as f32 * factor).max(1) as u32;
    (scale(width), scale(height))
}

/// Scale the whole raster by `factor` on both axes, consuming it.
pub fn scale_uniform(
    raster: WorkingRaster,
    factor: f32,
    filter: FilterType,
) -> Result<WorkingRaster, TransformError> {
    if !factor.is_finite() || factor <= 0.0 {
        return Err(TransformError::InvalidFactor(factor));
    }

    let (width, height) = scaled_dimensions(raster.width, raster.height, factor);

    // Fast path: nothing to resample
    if width == raster.width && height == raster.height {
        return Ok(raster);
    }

    let (src_width, src_height) = (raster.width, raster.height);
    let img = raster
        .into_rgba_image()
        .ok_or(TransformError::BufferMismatch {
            width: src_width,
            height: src_height,
        })?;

    let resized = image::imageops::resize(&img, width, height, filter.to_image_filter());
    drop(img);

    Ok(WorkingRaster::from_rgba_image(resized))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: Downscaling never grows either axis and keeps both positive.
        #[test]
        fn prop_downscale_bounded(
            width in 1u32..=4000,
            height in 1u32..=4000,
            factor in 0.01f32..=1.0,
        ) {
            let (w, h) = scaled_dimensions(width, height, factor);
            prop_assert!(w >= 1 && w <= width);
            prop_assert!(h >= 1 && h <= height);
        }

        /// Property: Scaled rasters have consistent buffers.
        #[test]
        fn prop_buffer_matches_dimensions(
            width in 1u32..=40,
            height in 1u32..=40,
            factor in 0.1f32..=1.0,
        ) {
            let raster = WorkingRaster::new(width, height, vec![7u8; (width * height * 4) as usize]);
            let result = scale_uniform(raster, factor, FilterType::Bilinear).unwrap();
            prop_assert_eq!(result.pixels.len(), (result.width * result.height * 4) as usize);
        }
    }
}
