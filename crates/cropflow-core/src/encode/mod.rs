//! Output encoding for cropflow.
//!
//! This module provides functionality for:
//! - Encoding a raster to JPEG (with quality), PNG or lossless WebP in memory
//! - Carrying source EXIF tags into the encoded JPEG
//!
//! # Examples
//!
//! ```ignore
//! use cropflow_core::encode::{encode, CarriedExif, OutputFormat};
//!
//! let carried = CarriedExif::from_path(Path::new("source.jpg"));
//! let (w, h) = (raster.width, raster.height);
//! let jpeg = encode(raster, OutputFormat::Jpeg, 90)?;
//! let jpeg = carried.apply_to_jpeg(&jpeg, w, h)?;
//! ```

mod format;
mod metadata;

pub use format::{encode, EncodeError, OutputFormat};
pub use metadata::{insert_exif_segment, CarriedExif, MetadataError};
