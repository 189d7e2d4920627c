//! Decoding under a memory ceiling.
//!
//! The loop reads the declared bounds first, picks a power-of-two sample size
//! for the requested output size and then decodes. Memory pressure (either the
//! decoder's allocation limit or a decoded buffer over the byte ceiling)
//! doubles the sample size and tries again, up to a fixed number of attempts.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::{DynamicImage, ImageError, ImageFormat, ImageReader, Limits, RgbaImage};

use super::DecodeError;
use crate::raster::BYTES_PER_PIXEL;
use crate::WorkingRaster;

/// Largest decoded raster the loop accepts (100 MiB).
pub const DEFAULT_MAX_RASTER_BYTES: usize = 100 * 1024 * 1024;

/// Attempts before the loop gives up on memory pressure.
pub const DEFAULT_MAX_DECODE_ATTEMPTS: u32 = 10;

/// Source of pixels for the bounded decode loop.
///
/// `decode_sampled` must report allocation failures as
/// [`DecodeError::OutOfMemory`] so the loop can retry with a larger sample size.
pub trait RasterDecoder: Send + Sync {
    /// Declared `(width, height)` without decoding pixel data.
    fn read_bounds(&self, path: &Path) -> Result<(u32, u32), DecodeError>;

    /// Decode the image with every dimension divided by `sample_size`.
    fn decode_sampled(&self, path: &Path, sample_size: u32) -> Result<WorkingRaster, DecodeError>;
}

/// [`RasterDecoder`] backed by the `image` codecs.
///
/// JPEG goes through DCT scaling and PNG is reduced one row at a time, so the
/// memory an attempt needs shrinks with the sample size. Other formats are
/// decoded at full size and reduced afterwards. Each attempt is checked
/// against the allocation limit before any pixel buffer is allocated; going
/// over it is reported as `OutOfMemory`.
#[derive(Debug, Clone, Default)]
pub struct ImageCrateDecoder {
    alloc_limit: Option<u64>,
}

impl ImageCrateDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the working allocations of one attempt at `bytes`.
    pub fn with_alloc_limit(bytes: u64) -> Self {
        Self {
            alloc_limit: Some(bytes),
        }
    }

    fn reserve(&self, bytes: u64) -> Result<(), DecodeError> {
        match self.alloc_limit {
            Some(limit) if bytes > limit => {
                log::debug!("decode: attempt needs {} bytes, limit {}", bytes, limit);
                Err(DecodeError::OutOfMemory)
            }
            _ => Ok(()),
        }
    }

    fn decode_jpeg(&self, path: &Path, sample_size: u32) -> Result<WorkingRaster, DecodeError> {
        let mut decoder = jpeg_decoder::Decoder::new(open_buffered(path)?);
        decoder.read_info().map_err(map_jpeg_error)?;
        let info = decoder
            .info()
            .ok_or_else(|| DecodeError::Corrupted("missing JPEG frame header".to_string()))?;
        let (width, height) =
            sampled_size(u32::from(info.width), u32::from(info.height), sample_size);

        // DCT scaling stops at 1/8 and never lands below the requested size
        let (scaled_width, scaled_height) = decoder
            .scale(clamp_u16(width), clamp_u16(height))
            .map_err(map_jpeg_error)?;
        let (scaled_width, scaled_height) = (u32::from(scaled_width), u32::from(scaled_height));
        let pixel_bytes = (info.pixel_format.pixel_bytes() + BYTES_PER_PIXEL) as u64;
        self.reserve(u64::from(scaled_width) * u64::from(scaled_height) * pixel_bytes)?;

        let data = decoder.decode().map_err(map_jpeg_error)?;
        let rgba = jpeg_to_rgba(&data, info.pixel_format)?;
        drop(data);
        let img = RgbaImage::from_raw(scaled_width, scaled_height, rgba).ok_or_else(|| {
            DecodeError::Corrupted(format!(
                "JPEG data does not fill {}x{}",
                scaled_width, scaled_height
            ))
        })?;

        let img = DynamicImage::ImageRgba8(img);
        let img = if (scaled_width, scaled_height) != (width, height) {
            img.thumbnail_exact(width, height)
        } else {
            img
        };
        Ok(WorkingRaster::from_dynamic(img))
    }

    fn decode_png(&self, path: &Path, sample_size: u32) -> Result<WorkingRaster, DecodeError> {
        let mut decoder = png::Decoder::new(open_buffered(path)?);
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder.read_info().map_err(map_png_error)?;

        let (source_width, source_height, interlaced) = {
            let info = reader.info();
            (info.width, info.height, info.interlaced)
        };
        let (color, depth) = reader.output_color_type();
        if interlaced || depth != png::BitDepth::Eight {
            // Adam7 passes do not arrive in row order
            return self.decode_full(path, sample_size);
        }
        let channels = color.samples();

        let mut sampler = BoxSampler::new(source_width, source_height, sample_size);
        let row_bytes = u64::from(source_width) * channels as u64;
        self.reserve(sampler.working_bytes() + row_bytes)?;

        while let Some(row) = reader.next_row().map_err(map_png_error)? {
            if sampler.push_row(row.data(), channels)? {
                break;
            }
        }
        sampler.finish()
    }

    fn decode_full(&self, path: &Path, sample_size: u32) -> Result<WorkingRaster, DecodeError> {
        let mut reader = ImageReader::open(path)
            .map_err(|e| DecodeError::Io(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| DecodeError::Io(e.to_string()))?;

        if let Some(limit) = self.alloc_limit {
            let mut limits = Limits::default();
            limits.max_alloc = Some(limit);
            reader.limits(limits);
        }

        let img = reader.decode().map_err(map_image_error)?;

        let img = if sample_size > 1 {
            let (width, height) = sampled_size(img.width(), img.height(), sample_size);
            img.thumbnail_exact(width, height)
        } else {
            img
        };

        Ok(WorkingRaster::from_dynamic(img))
    }
}

impl RasterDecoder for ImageCrateDecoder {
    fn read_bounds(&self, path: &Path) -> Result<(u32, u32), DecodeError> {
        ImageReader::open(path)
            .map_err(|e| DecodeError::UnreadableBounds(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| DecodeError::UnreadableBounds(e.to_string()))?
            .into_dimensions()
            .map_err(|e| DecodeError::UnreadableBounds(e.to_string()))
    }

    fn decode_sampled(&self, path: &Path, sample_size: u32) -> Result<WorkingRaster, DecodeError> {
        let format = ImageReader::open(path)
            .map_err(|e| DecodeError::Io(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| DecodeError::Io(e.to_string()))?
            .format();

        match format {
            Some(ImageFormat::Jpeg) => self.decode_jpeg(path, sample_size),
            Some(ImageFormat::Png) => self.decode_png(path, sample_size),
            _ => self.decode_full(path, sample_size),
        }
    }
}

/// Output size for `sample_size`, never below 1x1.
fn sampled_size(width: u32, height: u32, sample_size: u32) -> (u32, u32) {
    let sample_size = sample_size.max(1);
    ((width / sample_size).max(1), (height / sample_size).max(1))
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn open_buffered(path: &Path) -> Result<BufReader<File>, DecodeError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| DecodeError::Io(e.to_string()))
}

fn jpeg_to_rgba(data: &[u8], format: jpeg_decoder::PixelFormat) -> Result<Vec<u8>, DecodeError> {
    use jpeg_decoder::PixelFormat;

    let rgba = match format {
        PixelFormat::L8 => data.iter().flat_map(|&v| [v, v, v, 255]).collect(),
        // Big-endian samples; keep the high byte
        PixelFormat::L16 => data
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], 255])
            .collect(),
        PixelFormat::RGB24 => data
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], 255])
            .collect(),
        PixelFormat::CMYK32 => data.chunks_exact(4).flat_map(cmyk_to_rgba).collect(),
        #[allow(unreachable_patterns)]
        other => {
            return Err(DecodeError::Corrupted(format!(
                "unsupported JPEG pixel format {:?}",
                other
            )))
        }
    };
    Ok(rgba)
}

fn cmyk_to_rgba(p: &[u8]) -> [u8; 4] {
    let k = 255 - u16::from(p[3]);
    let channel = |c: u8| ((255 - u16::from(c)) * k / 255) as u8;
    [channel(p[0]), channel(p[1]), channel(p[2]), 255]
}

/// Area-averaging reduction fed one source row at a time.
///
/// Output pixel `(x, y)` is the mean of the source block starting at
/// `(x * s, y * s)`. Source rows and columns past the last full block are
/// ignored, except when the source is smaller than one block.
struct BoxSampler {
    source_width: u32,
    source_height: u32,
    sample_size: u32,
    width: u32,
    height: u32,
    sums: Vec<u64>,
    rows_seen: u32,
    rows_done: u32,
    pixels: Vec<u8>,
}

impl BoxSampler {
    fn new(source_width: u32, source_height: u32, sample_size: u32) -> Self {
        let sample_size = sample_size.max(1);
        let (width, height) = sampled_size(source_width, source_height, sample_size);
        Self {
            source_width,
            source_height,
            sample_size,
            width,
            height,
            sums: Vec::new(),
            rows_seen: 0,
            rows_done: 0,
            pixels: Vec::new(),
        }
    }

    /// Bytes held by the accumulator and the output.
    fn working_bytes(&self) -> u64 {
        let row = u64::from(self.width) * BYTES_PER_PIXEL as u64;
        row * 8 + row * u64::from(self.height)
    }

    /// Half-open source range covered by output index `index`.
    fn span(&self, index: u32, limit: u32) -> (usize, usize) {
        let start = u64::from(index) * u64::from(self.sample_size);
        let end = (start + u64::from(self.sample_size)).min(u64::from(limit));
        (start as usize, end as usize)
    }

    /// Add one source row. Returns true once every output row is complete.
    fn push_row(&mut self, row: &[u8], channels: usize) -> Result<bool, DecodeError> {
        if self.rows_done >= self.height {
            return Ok(true);
        }
        if row.len() < self.source_width as usize * channels {
            return Err(DecodeError::Corrupted(format!(
                "row of {} bytes for width {}",
                row.len(),
                self.source_width
            )));
        }
        if self.sums.is_empty() {
            self.sums = vec![0; self.width as usize * BYTES_PER_PIXEL];
            self.pixels =
                Vec::with_capacity(self.width as usize * self.height as usize * BYTES_PER_PIXEL);
        }

        for out_x in 0..self.width {
            let (start, end) = self.span(out_x, self.source_width);
            let base = out_x as usize * BYTES_PER_PIXEL;
            for x in start..end {
                let px = rgba_at(row, x, channels);
                for (sum, value) in self.sums[base..base + BYTES_PER_PIXEL].iter_mut().zip(px) {
                    *sum += u64::from(value);
                }
            }
        }
        self.rows_seen += 1;

        let (block_start, block_end) = self.span(self.rows_done, self.source_height);
        if self.rows_seen as usize == block_end {
            self.flush((block_end - block_start) as u64);
        }
        Ok(self.rows_done >= self.height)
    }

    fn flush(&mut self, rows: u64) {
        for out_x in 0..self.width {
            let (start, end) = self.span(out_x, self.source_width);
            let count = (end - start) as u64 * rows;
            let base = out_x as usize * BYTES_PER_PIXEL;
            for sum in &mut self.sums[base..base + BYTES_PER_PIXEL] {
                self.pixels.push(((*sum + count / 2) / count) as u8);
                *sum = 0;
            }
        }
        self.rows_done += 1;
    }

    fn finish(self) -> Result<WorkingRaster, DecodeError> {
        if self.rows_done < self.height {
            return Err(DecodeError::Corrupted(format!(
                "image data ended after {} of {} rows",
                self.rows_seen, self.source_height
            )));
        }
        Ok(WorkingRaster::new(self.width, self.height, self.pixels))
    }
}

fn rgba_at(row: &[u8], x: usize, channels: usize) -> [u8; 4] {
    let p = &row[x * channels..(x + 1) * channels];
    match channels {
        1 => [p[0], p[0], p[0], 255],
        2 => [p[0], p[0], p[0], p[1]],
        3 => [p[0], p[1], p[2], 255],
        _ => [p[0], p[1], p[2], p[3]],
    }
}

fn map_image_error(err: ImageError) -> DecodeError {
    match err {
        ImageError::Limits(_) => DecodeError::OutOfMemory,
        ImageError::IoError(e) => DecodeError::Io(e.to_string()),
        other => DecodeError::Corrupted(other.to_string()),
    }
}

fn map_png_error(err: png::DecodingError) -> DecodeError {
    match err {
        png::DecodingError::LimitsExceeded => DecodeError::OutOfMemory,
        png::DecodingError::IoError(e) => DecodeError::Io(e.to_string()),
        other => DecodeError::Corrupted(other.to_string()),
    }
}

fn map_jpeg_error(err: jpeg_decoder::Error) -> DecodeError {
    match err {
        jpeg_decoder::Error::Io(e) => DecodeError::Io(e.to_string()),
        other => DecodeError::Corrupted(other.to_string()),
    }
}

/// Limits applied by [`decode_bounded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeBudget {
    /// Decoded rasters above this size trigger a retry at twice the sample size.
    pub max_raster_bytes: usize,
    /// Total decode attempts, including the first one.
    pub max_attempts: u32,
}

impl Default for DecodeBudget {
    fn default() -> Self {
        Self {
            max_raster_bytes: DEFAULT_MAX_RASTER_BYTES,
            max_attempts: DEFAULT_MAX_DECODE_ATTEMPTS,
        }
    }
}

/// Largest power of two `s` such that `width / s` and `height / s` stay at or
/// above the requested size.
///
/// A zero requirement leaves that axis unconstrained; with both at zero the
/// image is decoded at full size. Never returns less than 1.
pub fn calculate_sample_size(
    width: u32,
    height: u32,
    required_width: u32,
    required_height: u32,
) -> u32 {
    if required_width == 0 && required_height == 0 {
        return 1;
    }

    let mut sample_size: u32 = 1;
    loop {
        let next = match sample_size.checked_mul(2) {
            Some(next) => next,
            None => return sample_size,
        };
        let next_width = width / next;
        let next_height = height / next;

        if next_width == 0 || next_height == 0 {
            return sample_size;
        }
        if next_width < required_width || next_height < required_height {
            return sample_size;
        }
        sample_size = next;
    }
}

/// Run the bounded decode loop.
///
/// `is_cancelled` is polled before each attempt; once it returns true the loop
/// stops with [`DecodeError::Cancelled`].
pub fn decode_bounded<D>(
    decoder: &D,
    path: &Path,
    required_width: u32,
    required_height: u32,
    budget: &DecodeBudget,
    is_cancelled: &dyn Fn() -> bool,
) -> Result<WorkingRaster, DecodeError>
where
    D: RasterDecoder + ?Sized,
{
    let (width, height) = decoder.read_bounds(path)?;
    if width == 0 || height == 0 {
        return Err(DecodeError::UnreadableBounds(format!(
            "{} declares {}x{}",
            path.display(),
            width,
            height
        )));
    }

    let mut sample_size = calculate_sample_size(width, height, required_width, required_height);
    log::debug!(
        "decode: {}x{} source, required {}x{}, sample size {}",
        width,
        height,
        required_width,
        required_height,
        sample_size
    );

    for attempt in 1..=budget.max_attempts {
        if is_cancelled() {
            return Err(DecodeError::Cancelled);
        }

        match decoder.decode_sampled(path, sample_size) {
            Ok(raster) if raster.byte_size() > budget.max_raster_bytes => {
                log::warn!(
                    "decode: attempt {} produced {} bytes (ceiling {}), sample size {} -> {}",
                    attempt,
                    raster.byte_size(),
                    budget.max_raster_bytes,
                    sample_size,
                    sample_size.saturating_mul(2)
                );
                drop(raster);
                sample_size = sample_size.saturating_mul(2);
            }
            Ok(raster) => return Ok(raster),
            Err(DecodeError::OutOfMemory) => {
                log::warn!(
                    "decode: attempt {} ran out of memory, sample size {} -> {}",
                    attempt,
                    sample_size,
                    sample_size.saturating_mul(2)
                );
                sample_size = sample_size.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }

    Err(DecodeError::AttemptsExhausted {
        attempts: budget.max_attempts,
        sample_size,
    })
}


// ============================================================================
// Property-Based Tests
// ============================================================================
