//! cropflow-core - synchronous imaging core
//!
//! This crate provides the runtime-free half of cropflow: bounded-memory
//! decoding, orientation normalization, display-to-raster crop geometry,
//! resize/rotate/crop transforms and output encoding with EXIF carry-over.
//!
//! Every stage takes a [`WorkingRaster`] by value and hands back a new one,
//! so at most one full-size buffer is alive between stages.

pub mod decode;
pub mod encode;
pub mod geometry;
pub mod raster;
pub mod transform;

pub use decode::{DecodeError, ExifInfo};
pub use encode::{EncodeError, MetadataError, OutputFormat};
pub use geometry::{CropRegion, GeometryError, ImageState, Rect};
pub use raster::WorkingRaster;
pub use transform::{FilterType, InterpolationFilter, TransformError};
