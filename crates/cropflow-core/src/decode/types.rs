//! Core types for image decoding.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for image decoding operations.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The header could not be read or declares an empty image.
    #[error("Bounds could not be retrieved: {0}")]
    UnreadableBounds(String),

    /// The decoder hit its allocation limit. Retryable with a larger sample size.
    #[error("Out of memory during decoding")]
    OutOfMemory,

    /// The image data is corrupted, truncated or in an unsupported format.
    #[error("Image could not be decoded: {0}")]
    Corrupted(String),

    /// I/O error while reading the source.
    #[error("I/O error: {0}")]
    Io(String),

    /// Every attempt of the bounded decode loop ran into memory pressure.
    #[error("Decoding gave up after {attempts} attempts (last sample size {sample_size})")]
    AttemptsExhausted { attempts: u32, sample_size: u32 },

    /// The owning invocation was cancelled between attempts.
    #[error("Decoding cancelled")]
    Cancelled,
}

/// EXIF orientation values (1-8).
/// See: https://exiftool.org/TagNames/EXIF.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Orientation {
    /// Normal (no transformation needed).
    #[default]
    Normal = 1,
    /// Horizontal flip.
    FlipHorizontal = 2,
    /// Rotate 180 degrees.
    Rotate180 = 3,
    /// Vertical flip.
    FlipVertical = 4,
    /// Transpose (rotate 90 CW, then flip horizontal).
    Transpose = 5,
    /// Rotate 90 degrees clockwise.
    Rotate90CW = 6,
    /// Transverse (rotate 270 CW, then flip horizontal).
    Transverse = 7,
    /// Rotate 270 degrees clockwise (90 CCW).
    Rotate270CW = 8,
}

impl Orientation {
    /// Clockwise rotation that brings the stored pixels upright, applied
    /// before any mirroring.
    pub fn rotation_degrees(self) -> u32 {
        match self {
            Orientation::Normal | Orientation::FlipHorizontal => 0,
            Orientation::Rotate180 | Orientation::FlipVertical => 180,
            Orientation::Rotate90CW | Orientation::Transpose => 90,
            Orientation::Rotate270CW | Orientation::Transverse => 270,
        }
    }

    /// `-1` when a horizontal mirror follows the rotation, `1` otherwise.
    pub fn horizontal_flip(self) -> i8 {
        match self {
            Orientation::FlipHorizontal
            | Orientation::FlipVertical
            | Orientation::Transpose
            | Orientation::Transverse => -1,
            _ => 1,
        }
    }
}

impl From<u32> for Orientation {
    fn from(value: u32) -> Self {
        match value {
            1 => Orientation::Normal,
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90CW,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270CW,
            _ => Orientation::Normal,
        }
    }
}

/// Orientation metadata captured at load time and handed to the crop stage
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExifInfo {
    /// Raw EXIF orientation tag (0 when the source has none).
    pub orientation_code: u32,
    /// One of 0, 90, 180, 270.
    pub rotation_degrees: u32,
    /// `1` or `-1`.
    pub horizontal_flip: i8,
}

impl ExifInfo {
    /// Derive rotation and mirroring from a raw orientation tag.
    pub fn from_orientation_code(orientation_code: u32) -> Self {
        let orientation = Orientation::from(orientation_code);
        Self {
            orientation_code,
            rotation_degrees: orientation.rotation_degrees(),
            horizontal_flip: orientation.horizontal_flip(),
        }
    }

    /// True when neither a rotation nor a mirror is required.
    pub fn is_identity(&self) -> bool {
        self.rotation_degrees == 0 && self.horizontal_flip == 1
    }
}

impl Default for ExifInfo {
    fn default() -> Self {
        Self::from_orientation_code(0)
    }
}
