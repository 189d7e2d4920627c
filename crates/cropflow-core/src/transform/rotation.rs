//! Arbitrary-angle rotation with bilinear and Lanczos3 interpolation.
//!
//! The raster is rotated about its own centre into a canvas large enough to
//! hold every corner; pixels not covered by the source are left transparent.
//!
//! # Algorithm
//!
//! The rotation uses inverse mapping: for each pixel centre in the output,
//! we compute the source position and interpolate around it. With y pointing
//! down, a clockwise rotation by θ has the inverse:
//! ```text
//! src_x =  dx * cos(θ) + dy * sin(θ) + src_cx
//! src_y = -dx * sin(θ) + dy * cos(θ) + src_cy
//! ```
//!
//! Multiples of 90° skip interpolation and use exact quarter turns.

use serde::{Deserialize, Serialize};

use crate::raster::BYTES_PER_PIXEL;
use crate::WorkingRaster;

/// Interpolation filter for rotation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InterpolationFilter {
    /// Fast bilinear interpolation.
    #[default]
    Bilinear,
    /// High-quality Lanczos3 interpolation.
    Lanczos3,
}

/// Compute the dimensions of the bounding box for a rotated image.
///
/// # Example
///
/// ```
/// use cropflow_core::transform::compute_rotated_bounds;
///
/// // 90-degree rotation swaps dimensions
/// assert_eq!(compute_rotated_bounds(100, 50, 90.0), (50, 100));
/// assert_eq!(compute_rotated_bounds(100, 50, 0.0), (100, 50));
/// ```
pub fn compute_rotated_bounds(width: u32, height: u32, angle_degrees: f64) -> (u32, u32) {
    match quarter_turns(angle_degrees) {
        Some(0) | Some(2) => return (width, height),
        Some(_) => return (height, width),
        None => {}
    }

    let angle_rad = angle_degrees.to_radians();
    let cos = angle_rad.cos().abs();
    let sin = angle_rad.sin().abs();

    let w = width as f64;
    let h = height as f64;

    // new_w = |w*cos| + |h*sin|, new_h = |w*sin| + |h*cos|
    let new_w = (w * cos + h * sin).round() as u32;
    let new_h = (w * sin + h * cos).round() as u32;

    (new_w.max(1), new_h.max(1))
}

/// Rotate a raster clockwise about its centre, consuming it.
///
/// The output canvas is expanded to fit the entire rotated image.
pub fn rotate_about_center(
    raster: WorkingRaster,
    angle_degrees: f64,
    filter: InterpolationFilter,
) -> WorkingRaster {
    if let Some(turns) = quarter_turns(angle_degrees) {
        return rotate_quarter_turns(raster, turns);
    }

    let (src_w, src_h) = (raster.width as f64, raster.height as f64);
    let (dst_w, dst_h) = compute_rotated_bounds(raster.width, raster.height, angle_degrees);

    let angle_rad = angle_degrees.to_radians();
    let cos = angle_rad.cos();
    let sin = angle_rad.sin();

    let src_cx = src_w / 2.0;
    let src_cy = src_h / 2.0;
    let dst_cx = dst_w as f64 / 2.0;
    let dst_cy = dst_h as f64 / 2.0;

    let mut output = vec![0u8; dst_w as usize * dst_h as usize * BYTES_PER_PIXEL];

    for dst_y in 0..dst_h {
        for dst_x in 0..dst_w {
            // Pixel centre relative to the canvas centre
            let dx = dst_x as f64 + 0.5 - dst_cx;
            let dy = dst_y as f64 + 0.5 - dst_cy;

            // Back to source pixel-index space
            let src_x = dx * cos + dy * sin + src_cx - 0.5;
            let src_y = -dx * sin + dy * cos + src_cy - 0.5;

            let pixel = match filter {
                InterpolationFilter::Bilinear => sample_bilinear(&raster, src_x, src_y),
                InterpolationFilter::Lanczos3 => sample_lanczos3(&raster, src_x, src_y),
            };

            let dst_idx = (dst_y as usize * dst_w as usize + dst_x as usize) * BYTES_PER_PIXEL;
            output[dst_idx..dst_idx + BYTES_PER_PIXEL].copy_from_slice(&pixel);
        }
    }

    WorkingRaster::new(dst_w, dst_h, output)
}

/// Number of clockwise quarter turns if the angle is a multiple of 90°.
fn quarter_turns(angle_degrees: f64) -> Option<u32> {
    let normalized = angle_degrees.rem_euclid(360.0);
    let turns = (normalized / 90.0).round();
    if (normalized - turns * 90.0).abs() < 0.001 {
        Some(turns as u32 % 4)
    } else {
        None
    }
}

fn rotate_quarter_turns(raster: WorkingRaster, turns: u32) -> WorkingRaster {
    if turns == 0 {
        return raster;
    }
    let Some(img) = raster.into_rgba_image() else {
        return WorkingRaster::new(0, 0, Vec::new());
    };
    let rotated = match turns {
        1 => image::imageops::rotate90(&img),
        2 => image::imageops::rotate180(&img),
        _ => image::imageops::rotate270(&img),
    };
    WorkingRaster::from_rgba_image(rotated)
}

/// Get a pixel as [f64; 4] from a raster at the given coordinates.
#[inline]
fn get_pixel_f64(raster: &WorkingRaster, px: usize, py: usize) -> [f64; 4] {
    let idx = (py * raster.width as usize + px) * BYTES_PER_PIXEL;
    [
        raster.pixels[idx] as f64,
        raster.pixels[idx + 1] as f64,
        raster.pixels[idx + 2] as f64,
        raster.pixels[idx + 3] as f64,
    ]
}

/// Sample a pixel using bilinear interpolation.
///
/// Positions outside the source are fully transparent.
fn sample_bilinear(raster: &WorkingRaster, x: f64, y: f64) -> [u8; 4] {
    let (w, h) = (raster.width as f64, raster.height as f64);

    if x < -0.5 || x > w - 0.5 || y < -0.5 || y > h - 0.5 {
        return [0, 0, 0, 0];
    }

    // Clamp into the pixel grid so the half-pixel border still samples edges
    let x = x.clamp(0.0, w - 1.0);
    let y = y.clamp(0.0, h - 1.0);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(raster.width as usize - 1);
    let y1 = (y0 + 1).min(raster.height as usize - 1);

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = get_pixel_f64(raster, x0, y0);
    let p10 = get_pixel_f64(raster, x1, y0);
    let p01 = get_pixel_f64(raster, x0, y1);
    let p11 = get_pixel_f64(raster, x1, y1);

    let mut result = [0u8; 4];
    for i in 0..4 {
        let v = p00[i] * (1.0 - fx) * (1.0 - fy)
            + p10[i] * fx * (1.0 - fy)
            + p01[i] * (1.0 - fx) * fy
            + p11[i] * fx * fy;
        result[i] = v.clamp(0.0, 255.0).round() as u8;
    }

    result
}

/// Sample a pixel using Lanczos3 interpolation.
///
/// Lanczos3 considers a 6x6 neighborhood; near the edges it falls back to
/// bilinear.
fn sample_lanczos3(raster: &WorkingRaster, x: f64, y: f64) -> [u8; 4] {
    let (w, h) = (raster.width as i64, raster.height as i64);

    if x < 2.0 || x >= (w - 3) as f64 || y < 2.0 || y >= (h - 3) as f64 {
        return sample_bilinear(raster, x, y);
    }

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;

    let mut sum = [0.0f64; 4];
    let mut weight_sum = 0.0;

    for ky in -2..=3 {
        for kx in -2..=3 {
            let px = x0 + kx;
            let py = y0 + ky;

            if px >= 0 && px < w && py >= 0 && py < h {
                let weight =
                    lanczos_weight(x - px as f64, 3.0) * lanczos_weight(y - py as f64, 3.0);
                let pixel = get_pixel_f64(raster, px as usize, py as usize);
                for i in 0..4 {
                    sum[i] += pixel[i] * weight;
                }
                weight_sum += weight;
            }
        }
    }

    let mut result = [0u8; 4];
    if weight_sum > 0.0 {
        for i in 0..4 {
            result[i] = (sum[i] / weight_sum).clamp(0.0, 255.0).round() as u8;
        }
    }

    result
}

/// Lanczos kernel weight function.
///
/// ```text
/// L(x) = sinc(x) * sinc(x/a)  for |x| < a
/// L(x) = 0                     for |x| >= a
/// ```
fn lanczos_weight(x: f64, a: f64) -> f64 {
    if x.abs() < f64::EPSILON {
        return 1.0;
    }
    if x.abs() >= a {
        return 0.0;
    }

    let pi_x = std::f64::consts::PI * x;
    let pi_x_a = pi_x / a;

    (a * pi_x.sin() * pi_x_a.sin()) / (pi_x * pi_x)
}
