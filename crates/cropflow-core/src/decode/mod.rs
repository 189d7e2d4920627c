//! Image decoding for cropflow.
//!
//! This module provides functionality for:
//! - Reading declared bounds and picking a power-of-two sample size
//! - Decoding under a byte ceiling with bounded out-of-memory retries
//! - Reading EXIF orientation and normalizing the raster to upright
//!
//! # Architecture
//!
//! Decoding goes through the [`RasterDecoder`] trait so the retry loop can be
//! driven by the `image` crate in production and by scripted decoders in tests.
//! All operations are synchronous; the async layer runs them on blocking
//! worker threads.
//!
//! # Examples
//!
//! ```ignore
//! use cropflow_core::decode::{decode_bounded, DecodeBudget, ImageCrateDecoder};
//!
//! let raster = decode_bounded(
//!     &ImageCrateDecoder::new(),
//!     Path::new("photo.jpg"),
//!     1000,
//!     750,
//!     &DecodeBudget::default(),
//!     &|| false,
//! )?;
//! println!("Decoded {}x{} raster", raster.width, raster.height);
//! ```

mod bounded;
mod orientation;
mod types;

pub use bounded::{
    calculate_sample_size, decode_bounded, DecodeBudget, ImageCrateDecoder, RasterDecoder,
    DEFAULT_MAX_DECODE_ATTEMPTS, DEFAULT_MAX_RASTER_BYTES,
};
pub use orientation::{exif_info_from_reader, normalize_orientation, read_exif_info};
pub use types::{DecodeError, ExifInfo, Orientation};
