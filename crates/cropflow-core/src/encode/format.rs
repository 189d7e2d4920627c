//! Output encoders.
//!
//! The crop result is encoded fully in memory so the caller can write it to
//! disk in a single call. JPEG is the lossy format and honours the quality
//! setting; PNG and WebP are lossless and ignore it.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::raster::BYTES_PER_PIXEL;
use crate::WorkingRaster;

/// Errors that can occur during encoding.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Pixel data length doesn't match expected dimensions
    #[error("Invalid pixel data: expected {expected} bytes (width * height * 4), got {actual}")]
    InvalidPixelData { expected: usize, actual: usize },

    /// Width or height is zero
    #[error("Invalid dimensions: width ({width}) and height ({height}) must be non-zero")]
    InvalidDimensions { width: u32, height: u32 },

    /// The codec rejected the image
    #[error("{format:?} encoding failed: {message}")]
    EncodingFailed {
        format: OutputFormat,
        message: String,
    },
}

/// Container format of the crop output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossy raster format.
    #[default]
    Jpeg,
    /// Lossless raster format.
    Png,
    /// Lossless WebP.
    WebP,
}

impl OutputFormat {
    /// Whether EXIF metadata is carried into this container.
    pub fn carries_exif(self) -> bool {
        matches!(self, OutputFormat::Jpeg)
    }
}

/// Encode an RGBA raster, consuming it.
///
/// The raster's buffer is dropped as soon as the codec is done with it.
/// `quality` (clamped to 1-100) only applies to lossy formats; JPEG has no
/// alpha channel, so transparent pixels are flattened to their colour values.
pub fn encode(
    raster: WorkingRaster,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, EncodeError> {
    let WorkingRaster {
        width,
        height,
        pixels,
    } = raster;

    // Validate dimensions
    if width == 0 || height == 0 {
        return Err(EncodeError::InvalidDimensions { width, height });
    }

    // Validate pixel data length
    let expected_len = width as usize * height as usize * BYTES_PER_PIXEL;
    if pixels.len() != expected_len {
        return Err(EncodeError::InvalidPixelData {
            expected: expected_len,
            actual: pixels.len(),
        });
    }

    let mut buffer = Cursor::new(Vec::new());
    let failed = |e: image::ImageError| EncodeError::EncodingFailed {
        format,
        message: e.to_string(),
    };

    match format {
        OutputFormat::Jpeg => {
            let rgb = strip_alpha(pixels);
            JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
                .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
                .map_err(failed)?;
        }
        OutputFormat::Png => {
            PngEncoder::new(&mut buffer)
                .write_image(&pixels, width, height, ExtendedColorType::Rgba8)
                .map_err(failed)?;
        }
        OutputFormat::WebP => {
            WebPEncoder::new_lossless(&mut buffer)
                .write_image(&pixels, width, height, ExtendedColorType::Rgba8)
                .map_err(failed)?;
        }
    }

    Ok(buffer.into_inner())
}

/// Drop every fourth byte, reusing the allocation.
fn strip_alpha(mut pixels: Vec<u8>) -> Vec<u8> {
    let count = pixels.len() / BYTES_PER_PIXEL;
    for i in 0..count {
        let src = i * BYTES_PER_PIXEL;
        let dst = i * 3;
        pixels.copy_within(src..src + 3, dst);
    }
    pixels.truncate(count * 3);
    pixels
}


// ============================================================================
// Property-Based Tests
// ============================================================================
