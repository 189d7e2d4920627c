//! Raster transforms used by the crop pipeline: resize, rotation and region
//! extraction.
//!
//! # Transform Order
//!
//! A crop request applies these in order, each consuming the previous raster:
//! 1. Uniform downscale (only when an output bound is configured)
//! 2. Rotation about the centre (only when the view is rotated)
//! 3. Region extraction
//!
//! # Coordinate System
//!
//! - Rotation angles are in degrees, positive = clockwise
//! - Regions are integer pixel coordinates
//! - Origin is top-left corner

mod crop;
mod resize;
mod rotation;

pub use crop::extract_region;
pub use resize::{scale_uniform, scaled_dimensions, FilterType, TransformError};
pub use rotation::{compute_rotated_bounds, rotate_about_center, InterpolationFilter};
