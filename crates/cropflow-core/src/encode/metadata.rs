//! EXIF carry-over from the source image into a re-encoded JPEG.
//!
//! Only descriptive tags survive (camera, exposure, capture time, GPS, white
//! balance). Dimension tags are rewritten for the new raster, and the
//! orientation is reset to 1 because pixels have already been normalized.
//!
//! The tags are serialized with `exif::experimental::Writer` and spliced into
//! the encoded JPEG as an APP1 segment, directly after SOI or after the JFIF
//! APP0 segment when the encoder wrote one.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::path::Path;

use exif::experimental::Writer;
use exif::{Context, Field, In, Reader, Tag, Value};
use thiserror::Error;

/// Identifier that opens an EXIF APP1 payload.
const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Largest payload a JPEG marker segment can hold (length field included).
const MAX_SEGMENT_LEN: usize = 0xFFFF;

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;

/// Primary-IFD tags copied from the source.
const CARRIED_TAGS: &[Tag] = &[
    Tag::FNumber,
    Tag::DateTime,
    Tag::DateTimeDigitized,
    Tag::DateTimeOriginal,
    Tag::ExposureTime,
    Tag::Flash,
    Tag::FocalLength,
    Tag::PhotographicSensitivity,
    Tag::Make,
    Tag::Model,
    Tag::SubSecTime,
    Tag::SubSecTimeDigitized,
    Tag::SubSecTimeOriginal,
    Tag::WhiteBalance,
];

/// Errors from reading, building or inserting EXIF metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The TIFF structure could not be serialized
    #[error("EXIF serialization failed: {0}")]
    Write(String),

    /// The buffer does not start with a JPEG SOI marker
    #[error("Encoded buffer is not a JPEG stream")]
    NotJpeg,

    /// APP1 cannot hold the payload
    #[error("EXIF payload of {0} bytes does not fit into an APP1 segment")]
    SegmentTooLarge(usize),
}

/// Metadata fields selected from a source image.
#[derive(Debug, Clone, Default)]
pub struct CarriedExif {
    fields: Vec<Field>,
}

impl CarriedExif {
    /// Select the carried tags from a file. Missing or unreadable EXIF yields
    /// an empty set.
    pub fn from_path(path: &Path) -> Self {
        match File::open(path) {
            Ok(file) => Self::from_reader(&mut BufReader::new(file)),
            Err(e) => {
                log::debug!("metadata: cannot open {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Same as [`from_path`](Self::from_path) for an already opened container.
    pub fn from_reader<R: BufRead + Seek>(reader: &mut R) -> Self {
        let exif = match Reader::new().read_from_container(reader) {
            Ok(exif) => exif,
            Err(e) => {
                log::debug!("metadata: no EXIF in source: {}", e);
                return Self::default();
            }
        };

        let fields = exif
            .fields()
            .filter(|f| f.ifd_num == In::PRIMARY && is_carried(f.tag))
            .cloned()
            .collect();
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Serialize the carried tags plus the new dimensions as a TIFF blob.
    pub fn to_tiff(&self, width: u32, height: u32) -> Result<Vec<u8>, MetadataError> {
        let rewritten = [
            primary(Tag::ImageWidth, Value::Long(vec![width])),
            primary(Tag::ImageLength, Value::Long(vec![height])),
            primary(Tag::PixelXDimension, Value::Long(vec![width])),
            primary(Tag::PixelYDimension, Value::Long(vec![height])),
            primary(Tag::Orientation, Value::Short(vec![1])),
        ];

        let mut writer = Writer::new();
        for field in self.fields.iter().chain(rewritten.iter()) {
            writer.push_field(field);
        }

        let mut buf = Cursor::new(Vec::new());
        writer
            .write(&mut buf, false)
            .map_err(|e| MetadataError::Write(e.to_string()))?;
        Ok(buf.into_inner())
    }

    /// Attach the carried tags to an encoded JPEG.
    ///
    /// An empty set returns the buffer unchanged.
    pub fn apply_to_jpeg(
        &self,
        jpeg: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, MetadataError> {
        if self.is_empty() {
            return Ok(jpeg.to_vec());
        }
        let tiff = self.to_tiff(width, height)?;
        insert_exif_segment(jpeg, &tiff)
    }
}

fn is_carried(tag: Tag) -> bool {
    tag.context() == Context::Gps || CARRIED_TAGS.contains(&tag)
}

fn primary(tag: Tag, value: Value) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value,
    }
}

/// Splice `tiff` into `jpeg` as an EXIF APP1 segment.
pub fn insert_exif_segment(jpeg: &[u8], tiff: &[u8]) -> Result<Vec<u8>, MetadataError> {
    if jpeg.len() < 4 || jpeg[0..2] != SOI {
        return Err(MetadataError::NotJpeg);
    }

    // Length field counts itself
    let segment_len = 2 + EXIF_HEADER.len() + tiff.len();
    if segment_len > MAX_SEGMENT_LEN {
        return Err(MetadataError::SegmentTooLarge(segment_len));
    }

    let insert_at = match (jpeg[2], jpeg[3]) {
        (0xFF, APP0) if jpeg.len() >= 6 => {
            let app0_len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
            (4 + app0_len).min(jpeg.len())
        }
        _ => 2,
    };

    let mut out = Vec::with_capacity(jpeg.len() + segment_len + 2);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[0xFF, APP1]);
    out.extend_from_slice(&(segment_len as u16).to_be_bytes());
    out.extend_from_slice(EXIF_HEADER);
    out.extend_from_slice(tiff);
    out.extend_from_slice(&jpeg[insert_at..]);
    Ok(out)
}
