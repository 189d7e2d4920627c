//! EXIF orientation lookup and normalization.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::path::Path;

use exif::{In, Reader, Tag};
use image::DynamicImage;

use super::{DecodeError, ExifInfo};
use crate::WorkingRaster;

/// Read the orientation tag of an image file.
///
/// Files without EXIF data, or whose orientation cannot be determined, yield
/// an `ExifInfo` with `orientation_code == 0` (identity).
pub fn read_exif_info(path: &Path) -> ExifInfo {
    match File::open(path) {
        Ok(file) => exif_info_from_reader(&mut BufReader::new(file)),
        Err(e) => {
            log::debug!("orientation: cannot open {}: {}", path.display(), e);
            ExifInfo::default()
        }
    }
}

/// Same as [`read_exif_info`] for an in-memory or already opened container.
pub fn exif_info_from_reader<R: BufRead + Seek>(reader: &mut R) -> ExifInfo {
    let code = match Reader::new().read_from_container(reader) {
        Ok(exif) => exif
            .get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(0),
        Err(_) => 0,
    };
    ExifInfo::from_orientation_code(code)
}

/// Rotate clockwise by `rotation_degrees`, then mirror horizontally when the
/// flip factor is -1. An identity transform hands the raster back untouched.
pub fn normalize_orientation(
    raster: WorkingRaster,
    info: &ExifInfo,
) -> Result<WorkingRaster, DecodeError> {
    if info.is_identity() {
        return Ok(raster);
    }

    let img = raster.into_dynamic().ok_or_else(|| {
        DecodeError::Corrupted("pixel buffer does not match raster dimensions".to_string())
    })?;

    let rotated = rotate_quarter_turns(img, info.rotation_degrees);
    let oriented = if info.horizontal_flip < 0 {
        rotated.fliph()
    } else {
        rotated
    };

    Ok(WorkingRaster::from_dynamic(oriented))
}

fn rotate_quarter_turns(img: DynamicImage, degrees: u32) -> DynamicImage {
    match degrees % 360 {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    }
}
