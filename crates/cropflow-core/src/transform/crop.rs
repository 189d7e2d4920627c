//! Pixel-region extraction.
//!
//! Unlike a viewer-side crop, the region here comes from geometry that is
//! expected to fit the raster. Offsets and sizes that overshoot by no more
//! than the region's rounding tolerance are pulled back onto the raster and
//! logged; any larger mismatch is reported as [`GeometryError::OutOfBounds`].

use crate::geometry::{CropRegion, GeometryError};
use crate::raster::BYTES_PER_PIXEL;
use crate::WorkingRaster;

/// Extract `region` from `raster`, consuming the source raster.
///
/// Returns the extracted pixels together with the region that was actually
/// copied, which differs from `region` when it had to be pulled back onto the
/// raster. The source buffer is dropped as soon as the region has been copied
/// out.
pub fn extract_region(
    raster: WorkingRaster,
    region: &CropRegion,
) -> Result<(WorkingRaster, CropRegion), GeometryError> {
    let (x, y, width, height) = fit_region(&raster, region)?;
    let fitted = CropRegion {
        offset_x: x as i32,
        offset_y: y as i32,
        width: width as i32,
        height: height as i32,
    };
    if fitted != *region {
        log::warn!(
            "crop: region {:?} overshoots the {}x{} raster, clamped to {:?}",
            region,
            raster.width,
            raster.height,
            fitted
        );
    }

    let src_stride = raster.width as usize * BYTES_PER_PIXEL;
    let row_len = width as usize * BYTES_PER_PIXEL;
    let mut output = Vec::with_capacity(row_len * height as usize);

    // Copy pixel data row by row
    for row in 0..height as usize {
        let start = (y as usize + row) * src_stride + x as usize * BYTES_PER_PIXEL;
        output.extend_from_slice(&raster.pixels[start..start + row_len]);
    }
    drop(raster);

    Ok((WorkingRaster::new(width, height, output), fitted))
}

/// Resolve `region` to in-bounds `(x, y, width, height)`.
fn fit_region(
    raster: &WorkingRaster,
    region: &CropRegion,
) -> Result<(u32, u32, u32, u32), GeometryError> {
    let out_of_bounds = || GeometryError::OutOfBounds {
        x: region.offset_x,
        y: region.offset_y,
        width: region.width,
        height: region.height,
        raster_width: raster.width,
        raster_height: raster.height,
    };

    if region.width <= 0 || region.height <= 0 || raster.is_released() {
        return Err(out_of_bounds());
    }

    let tolerance = i64::from(region.tolerance());
    let fit_axis = |offset: i32, len: i32, limit: u32| -> Option<(u32, u32)> {
        let (offset, len, limit) = (i64::from(offset), i64::from(len), i64::from(limit));
        if offset < -tolerance || offset + len - limit > tolerance {
            return None;
        }
        let start = offset.clamp(0, limit - 1);
        let end = (start + len).min(limit);
        Some((start as u32, (end - start) as u32))
    };

    let (x, width) =
        fit_axis(region.offset_x, region.width, raster.width).ok_or_else(out_of_bounds)?;
    let (y, height) =
        fit_axis(region.offset_y, region.height, raster.height).ok_or_else(out_of_bounds)?;

    if width == 0 || height == 0 {
        return Err(out_of_bounds());
    }
    Ok((x, y, width, height))
}


// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn test_raster(width: u32, height: u32) -> WorkingRaster {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = ((y * width + x) % 256) as u8;
                pixels.extend_from_slice(&[v, v, v, 255]);
            }
        }
        WorkingRaster::new(width, height, pixels)
    }

    /// Strategy for a raster size plus an in-bounds region.
    fn region_strategy() -> impl Strategy<Value = ((u32, u32), CropRegion)> {
        (4u32..=80, 4u32..=80).prop_flat_map(|(w, h)| {
            (0..w as i32, 0..h as i32).prop_flat_map(move |(x, y)| {
                (1..=(w as i32 - x), 1..=(h as i32 - y)).prop_map(move |(cw, ch)| {
                    (
                        (w, h),
                        CropRegion {
                            offset_x: x,
                            offset_y: y,
                            width: cw,
                            height: ch,
                        },
                    )
                })
            })
        })
    }

    proptest! {
        /// Property: In-bounds regions come out at exactly the requested size.
        #[test]
        fn prop_in_bounds_exact_size(((w, h), region) in region_strategy()) {
            let img = test_raster(w, h);
            let (result, fitted) = extract_region(img, &region).unwrap();

            prop_assert_eq!(result.width as i32, region.width);
            prop_assert_eq!(result.height as i32, region.height);
            prop_assert_eq!(fitted, region);
            prop_assert_eq!(result.pixels.len(), (result.width * result.height * 4) as usize);
        }

        /// Property: The first pixel is the region's top-left source pixel.
        #[test]
        fn prop_first_pixel_matches_source(((w, h), region) in region_strategy()) {
            let img = test_raster(w, h);
            let expected = ((region.offset_y as u32 * w + region.offset_x as u32) % 256) as u8;
            let (result, _) = extract_region(img, &region).unwrap();

            prop_assert_eq!(result.pixels[0], expected);
        }

        /// Property: Output never exceeds the source.
        #[test]
        fn prop_output_bounded_by_input(
            (w, h) in (4u32..=80, 4u32..=80),
            x in -2i32..=90,
            y in -2i32..=90,
            cw in 1i32..=90,
            ch in 1i32..=90,
        ) {
            let img = test_raster(w, h);
            let region = CropRegion { offset_x: x, offset_y: y, width: cw, height: ch };
            if let Ok((result, fitted)) = extract_region(img, &region) {
                prop_assert!(result.width <= w);
                prop_assert!(result.height <= h);
                prop_assert_eq!(fitted.width as u32, result.width);
                prop_assert_eq!(fitted.height as u32, result.height);
            }
        }
    }
}
