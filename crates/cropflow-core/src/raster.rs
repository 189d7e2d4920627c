//! The working raster: the single, exclusively-owned pixel buffer that flows
//! through decode, orientation, resize, rotation and crop.
//!
//! Every transform in this crate takes a `WorkingRaster` by value and returns a
//! new one, so the previous buffer is dropped as soon as its replacement exists.

use image::{DynamicImage, RgbaImage};

/// Bytes per RGBA8 pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// A decoded RGBA8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingRaster {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGBA pixel data in row-major order (4 bytes per pixel).
    /// Length is width * height * 4.
    pub pixels: Vec<u8>,
}

impl WorkingRaster {
    /// Create a raster from raw RGBA bytes.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(
            pixels.len(),
            width as usize * height as usize * BYTES_PER_PIXEL,
            "Pixel buffer size mismatch"
        );
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Take ownership of an `RgbaImage` buffer.
    pub fn from_rgba_image(img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            pixels: img.into_raw(),
        }
    }

    /// Convert any decoded image into RGBA8 and take its buffer.
    pub fn from_dynamic(img: DynamicImage) -> Self {
        Self::from_rgba_image(img.into_rgba8())
    }

    /// Hand the buffer over to the `image` crate without copying.
    ///
    /// Returns `None` if the buffer length does not match the dimensions.
    pub fn into_rgba_image(self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels)
    }

    /// Same as [`into_rgba_image`](Self::into_rgba_image), wrapped for the
    /// `DynamicImage` APIs.
    pub fn into_dynamic(self) -> Option<DynamicImage> {
        self.into_rgba_image().map(DynamicImage::ImageRgba8)
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// Free the pixel buffer. A released raster is rejected by the crop stage.
    pub fn release(&mut self) {
        self.pixels = Vec::new();
        self.width = 0;
        self.height = 0;
    }

    /// True once [`release`](Self::release) ran or the raster never held pixels.
    pub fn is_released(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pixels.is_empty()
    }
}
