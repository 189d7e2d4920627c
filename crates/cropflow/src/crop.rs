//! Crop execution: map the view state onto the raster, then either copy the
//! source file untouched or crop, encode and write a new one.

use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::{Deserialize, Serialize};

use cropflow_core::encode::{encode, CarriedExif};
use cropflow_core::geometry::CropRegion;
use cropflow_core::transform::{extract_region, rotate_about_center, scale_uniform};
use cropflow_core::{ExifInfo, ImageState, OutputFormat, WorkingRaster};

use crate::config::CropConfig;
use crate::error::TaskError;
use crate::runner::{run_blocking, TaskHandle, TaskRunner};

/// Output settings of one crop invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropParameters {
    /// Upper bound on the output width (0 = unbounded).
    pub max_result_width: u32,
    /// Upper bound on the output height (0 = unbounded).
    pub max_result_height: u32,
    pub output_format: OutputFormat,
    /// 0-100, lossy formats only.
    pub output_quality: u8,
    /// File the raster was decoded from.
    pub input_path: PathBuf,
    /// File to write.
    pub output_path: PathBuf,
    /// Orientation found during acquisition.
    pub exif_info: ExifInfo,
}

impl CropParameters {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            max_result_width: 0,
            max_result_height: 0,
            output_format: OutputFormat::Jpeg,
            output_quality: 90,
            input_path: input_path.into(),
            output_path: output_path.into(),
            exif_info: ExifInfo::default(),
        }
    }

    pub fn with_max_size(mut self, width: u32, height: u32) -> Self {
        self.max_result_width = width;
        self.max_result_height = height;
        self
    }

    pub fn with_format(mut self, format: OutputFormat, quality: u8) -> Self {
        self.output_format = format;
        self.output_quality = quality;
        self
    }

    pub fn with_exif_info(mut self, exif_info: ExifInfo) -> Self {
        self.exif_info = exif_info;
        self
    }

    /// Both bounds set: the output is fitted into them.
    pub fn is_size_bounded(&self) -> bool {
        self.max_result_width > 0 && self.max_result_height > 0
    }
}

/// Successful crop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropOutcome {
    pub output_path: PathBuf,
    pub offset_x: i32,
    pub offset_y: i32,
    pub width: i32,
    pub height: i32,
    /// False when the source file was copied instead of re-encoded.
    pub recompressed: bool,
}

impl CropOutcome {
    /// `file://` URL of the output, when its path is absolute.
    pub fn output_uri(&self) -> Option<Url> {
        Url::from_file_path(&self.output_path).ok()
    }
}

/// Result of the CPU-bound part of a crop.
enum Rendered {
    /// Cropping would not change anything within tolerance.
    Copy(CropRegion),
    Encoded { region: CropRegion, bytes: Vec<u8> },
}

/// Crops rasters off the calling context.
#[derive(Debug, Clone)]
pub struct CropService {
    runner: TaskRunner,
    config: CropConfig,
}

impl CropService {
    pub fn new(runner: TaskRunner, config: CropConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &CropConfig {
        &self.config
    }

    /// Crop in the background and deliver the result on the completion
    /// context. The raster is consumed.
    pub fn crop<C>(
        &self,
        raster: WorkingRaster,
        state: ImageState,
        params: CropParameters,
        callback: C,
    ) -> TaskHandle
    where
        C: FnOnce(Result<CropOutcome, TaskError>) + Send + 'static,
    {
        let service = self.clone();
        self.runner.execute(
            move |_| async move { service.execute(raster, state, params).await },
            callback,
        )
    }

    /// Crop and return the result directly.
    pub async fn execute(
        &self,
        raster: WorkingRaster,
        state: ImageState,
        params: CropParameters,
    ) -> Result<CropOutcome, TaskError> {
        let config = self.config;
        let job_params = params.clone();
        let rendered = run_blocking(move || render(raster, state, &job_params, config)).await?;

        match rendered {
            Rendered::Copy(region) => {
                copy_source(&params.input_path, &params.output_path).await?;
                Ok(outcome(&params, region, false))
            }
            Rendered::Encoded { region, bytes } => {
                tokio::fs::write(&params.output_path, &bytes)
                    .await
                    .map_err(|e| {
                        log::error!(
                            "crop: writing {} failed: {}",
                            params.output_path.display(),
                            e
                        );
                        TaskError::IoFailure(e)
                    })?;
                log::debug!(
                    "crop: wrote {} bytes to {}",
                    bytes.len(),
                    params.output_path.display()
                );
                Ok(outcome(&params, region, true))
            }
        }
    }
}

fn outcome(params: &CropParameters, region: CropRegion, recompressed: bool) -> CropOutcome {
    CropOutcome {
        output_path: params.output_path.clone(),
        offset_x: region.offset_x,
        offset_y: region.offset_y,
        width: region.width,
        height: region.height,
        recompressed,
    }
}

/// Validate, transform, decide, and encode. Consumes the raster.
fn render(
    raster: WorkingRaster,
    mut state: ImageState,
    params: &CropParameters,
    config: CropConfig,
) -> Result<Rendered, TaskError> {
    if raster.is_released() {
        return Err(TaskError::InvalidInput(
            "working raster has been released".to_string(),
        ));
    }
    state.validate()?;

    let mut raster = raster;
    if let Some(factor) = state.downscale_factor(params.max_result_width, params.max_result_height)
    {
        log::debug!(
            "crop: downscaling {}x{} by {}",
            raster.width,
            raster.height,
            factor
        );
        raster = scale_uniform(raster, factor, config.resize_filter)?;
        state.current_scale /= factor;
    }

    if state.current_angle != 0.0 {
        raster = rotate_about_center(
            raster,
            f64::from(state.current_angle),
            config.rotation_filter,
        );
    }

    let region = state.resolve_region();
    if !state.should_crop(&region, params.is_size_bounded()) {
        log::debug!("crop: region {:?} matches the image, copying source", region);
        return Ok(Rendered::Copy(region));
    }

    let (cropped, region) = extract_region(raster, &region)?;
    let (width, height) = (cropped.width, cropped.height);
    let bytes = encode(cropped, params.output_format, params.output_quality)?;

    let bytes = if params.output_format.carries_exif() {
        attach_source_exif(bytes, &params.input_path, width, height)
    } else {
        bytes
    };

    Ok(Rendered::Encoded { region, bytes })
}

/// Carry the source's EXIF tags into the encoded JPEG. Metadata problems are
/// logged and leave the image without EXIF.
fn attach_source_exif(jpeg: Vec<u8>, source: &Path, width: u32, height: u32) -> Vec<u8> {
    let carried = CarriedExif::from_path(source);
    if carried.is_empty() {
        return jpeg;
    }
    match carried.apply_to_jpeg(&jpeg, width, height) {
        Ok(tagged) => tagged,
        Err(e) => {
            log::warn!(
                "crop: dropping EXIF from {}: {}",
                source.display(),
                e
            );
            jpeg
        }
    }
}

/// Copy the source byte-for-byte, unless it already is the output.
async fn copy_source(input: &Path, output: &Path) -> Result<(), TaskError> {
    if same_file(input, output).await {
        log::debug!("crop: {} is already the output", input.display());
        return Ok(());
    }

    tokio::fs::copy(input, output).await.map_err(|e| {
        log::error!(
            "crop: copying {} to {} failed: {}",
            input.display(),
            output.display(),
            e
        );
        TaskError::IoFailure(e)
    })?;
    Ok(())
}

async fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (
        tokio::fs::canonicalize(a).await,
        tokio::fs::canonicalize(b).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cropflow_core::Rect;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn service() -> CropService {
        CropService::new(TaskRunner::current(), CropConfig::default())
    }

    /// Gradient raster so crops are distinguishable.
    fn raster(width: u32, height: u32) -> WorkingRaster {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, 90, 255]);
            }
        }
        WorkingRaster::new(width, height, pixels)
    }

    fn full_view(width: f32, height: f32) -> ImageState {
        let rect = Rect::new(0.0, 0.0, width, height);
        ImageState::new(rect, rect, 1.0, 0.0)
    }

    /// JPEG source with camera EXIF, as a phone would write it.
    fn write_camera_jpeg(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 200, 30]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&img)
            .unwrap();

        let fields = [
            exif::Field {
                tag: exif::Tag::Make,
                ifd_num: exif::In::PRIMARY,
                value: exif::Value::Ascii(vec![b"Fujifilm".to_vec()]),
            },
            exif::Field {
                tag: exif::Tag::Model,
                ifd_num: exif::In::PRIMARY,
                value: exif::Value::Ascii(vec![b"X-T4".to_vec()]),
            },
            exif::Field {
                tag: exif::Tag::Orientation,
                ifd_num: exif::In::PRIMARY,
                value: exif::Value::Short(vec![1]),
            },
        ];
        let mut writer = exif::experimental::Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        let mut tiff = std::io::Cursor::new(Vec::new());
        writer.write(&mut tiff, false).unwrap();

        let tagged = cropflow_core::encode::insert_exif_segment(&jpeg, tiff.get_ref()).unwrap();
        std::fs::write(path, tagged).unwrap();
    }

    fn read_exif(path: &Path) -> exif::Exif {
        let file = std::fs::File::open(path).unwrap();
        exif::Reader::new()
            .read_from_container(&mut std::io::BufReader::new(file))
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_op_crop_copies_bytes() {
        init_logger();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jpg");
        let output = dir.path().join("out.jpg");
        write_camera_jpeg(&input, 100, 80);

        let params = CropParameters::new(&input, &output);
        let outcome = service()
            .execute(raster(100, 80), full_view(100.0, 80.0), params)
            .await
            .unwrap();

        assert!(!outcome.recompressed);
        assert_eq!((outcome.offset_x, outcome.offset_y), (0, 0));
        assert_eq!((outcome.width, outcome.height), (100, 80));
        assert_eq!(std::fs::read(&input).unwrap(), std::fs::read(&output).unwrap());
    }

    #[tokio::test]
    async fn test_within_tolerance_copies() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        std::fs::write(&input, b"source bytes").unwrap();

        // Every edge within one display unit of the image
        let state = ImageState::new(
            Rect::new(0.8, 0.5, 99.4, 79.2),
            Rect::new(0.0, 0.0, 100.0, 80.0),
            1.0,
            0.0,
        );
        let outcome = service()
            .execute(raster(100, 80), state, CropParameters::new(&input, &output))
            .await
            .unwrap();

        assert!(!outcome.recompressed);
        assert_eq!(std::fs::read(&output).unwrap(), b"source bytes");
    }

    #[tokio::test]
    async fn test_same_path_copy_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("materialized.jpg");
        std::fs::write(&path, b"downloaded").unwrap();

        let outcome = service()
            .execute(
                raster(10, 10),
                full_view(10.0, 10.0),
                CropParameters::new(&path, &path),
            )
            .await
            .unwrap();

        assert!(!outcome.recompressed);
        assert_eq!(std::fs::read(&path).unwrap(), b"downloaded");
    }

    #[tokio::test]
    async fn test_crop_matches_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        std::fs::write(&input, b"unused").unwrap();

        let state = ImageState::new(
            Rect::new(10.0, 10.0, 110.0, 110.0),
            Rect::new(0.0, 0.0, 200.0, 200.0),
            2.0,
            0.0,
        );
        let params =
            CropParameters::new(&input, &output).with_format(OutputFormat::Png, 100);
        let outcome = service()
            .execute(raster(100, 100), state, params)
            .await
            .unwrap();

        assert!(outcome.recompressed);
        assert_eq!(
            (outcome.offset_x, outcome.offset_y, outcome.width, outcome.height),
            (5, 5, 50, 50)
        );

        let written = image::open(&output).unwrap().into_rgba8();
        assert_eq!(written.dimensions(), (50, 50));
        // Top-left pixel is source pixel (5, 5)
        assert_eq!(written.get_pixel(0, 0).0, [5, 5, 90, 255]);
    }

    #[tokio::test]
    async fn test_clamped_region_reports_written_size() {
        init_logger();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        std::fs::write(&input, b"unused").unwrap();

        // The view thinks the image is one pixel wider than the raster
        let state = ImageState::new(
            Rect::new(10.0, 0.0, 51.0, 50.0),
            Rect::new(0.0, 0.0, 51.0, 50.0),
            1.0,
            0.0,
        );
        let params =
            CropParameters::new(&input, &output).with_format(OutputFormat::Png, 100);
        let outcome = service()
            .execute(raster(50, 50), state, params)
            .await
            .unwrap();

        let written = image::open(&output).unwrap();
        assert_eq!((written.width(), written.height()), (40, 50));
        assert_eq!(
            (outcome.offset_x, outcome.offset_y, outcome.width, outcome.height),
            (10, 0, 40, 50)
        );
    }

    #[tokio::test]
    async fn test_bounded_output_is_downscaled() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        std::fs::write(&input, b"unused").unwrap();

        let params = CropParameters::new(&input, &output)
            .with_format(OutputFormat::Png, 100)
            .with_max_size(50, 50);
        let outcome = service()
            .execute(raster(200, 100), full_view(200.0, 100.0), params)
            .await
            .unwrap();

        assert!(outcome.recompressed);
        assert_eq!((outcome.width, outcome.height), (50, 25));
        let written = image::open(&output).unwrap();
        assert_eq!((written.width(), written.height()), (50, 25));
    }

    #[tokio::test]
    async fn test_rotated_crop_is_recompressed() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.webp");
        std::fs::write(&input, b"unused").unwrap();

        // A quarter turn: the displayed image is the swapped raster
        let rect = Rect::new(0.0, 0.0, 40.0, 60.0);
        let state = ImageState::new(rect, rect, 1.0, 90.0);
        let params =
            CropParameters::new(&input, &output).with_format(OutputFormat::WebP, 80);
        let outcome = service()
            .execute(raster(60, 40), state, params)
            .await
            .unwrap();

        assert!(outcome.recompressed);
        let written = image::open(&output).unwrap();
        assert_eq!((written.width(), written.height()), (40, 60));
    }

    #[tokio::test]
    async fn test_jpeg_output_carries_exif() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jpg");
        let output = dir.path().join("out.jpg");
        write_camera_jpeg(&input, 120, 90);

        let state = ImageState::new(
            Rect::new(20.0, 10.0, 80.0, 70.0),
            Rect::new(0.0, 0.0, 120.0, 90.0),
            1.0,
            0.0,
        );
        let params = CropParameters::new(&input, &output).with_format(OutputFormat::Jpeg, 85);
        let outcome = service()
            .execute(raster(120, 90), state, params)
            .await
            .unwrap();
        assert_eq!((outcome.width, outcome.height), (60, 60));

        let exif = read_exif(&output);
        let make = exif.get_field(exif::Tag::Make, exif::In::PRIMARY).unwrap();
        assert!(matches!(&make.value, exif::Value::Ascii(v) if v[0] == b"Fujifilm"));
        let width = exif
            .get_field(exif::Tag::PixelXDimension, exif::In::PRIMARY)
            .and_then(|f| f.value.get_uint(0));
        assert_eq!(width, Some(60));
        let orientation = exif
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|f| f.value.get_uint(0));
        assert_eq!(orientation, Some(1));
    }

    #[tokio::test]
    async fn test_same_path_crop_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.jpg");
        write_camera_jpeg(&path, 50, 50);

        let state = ImageState::new(
            Rect::new(0.0, 0.0, 20.0, 20.0),
            Rect::new(0.0, 0.0, 50.0, 50.0),
            1.0,
            0.0,
        );
        service()
            .execute(raster(50, 50), state, CropParameters::new(&path, &path))
            .await
            .unwrap();

        let written = image::open(&path).unwrap();
        assert_eq!((written.width(), written.height()), (20, 20));
        // EXIF was read before the file was replaced
        let exif = read_exif(&path);
        assert!(exif.get_field(exif::Tag::Model, exif::In::PRIMARY).is_some());
    }

    #[tokio::test]
    async fn test_released_raster_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.jpg");
        let mut released = raster(10, 10);
        released.release();

        let result = service()
            .execute(
                released,
                full_view(10.0, 10.0),
                CropParameters::new(dir.path().join("in.jpg"), &output),
            )
            .await;

        assert!(matches!(result, Err(TaskError::InvalidInput(_))));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_invalid_state_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.jpg");
        let params = CropParameters::new(dir.path().join("in.jpg"), &output);

        let empty = ImageState::new(
            Rect::new(0.0, 0.0, 5.0, 5.0),
            Rect::new(10.0, 10.0, 10.0, 20.0),
            1.0,
            0.0,
        );
        let result = service().execute(raster(10, 10), empty, params.clone()).await;
        assert!(matches!(result, Err(TaskError::InvalidInput(_))));

        let mut zero_scale = full_view(10.0, 10.0);
        zero_scale.current_scale = 0.0;
        let result = service().execute(raster(10, 10), zero_scale, params).await;
        assert!(matches!(result, Err(TaskError::InvalidInput(_))));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_out_of_bounds_region() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.png");

        // View claims a larger image than the raster holds
        let state = ImageState::new(
            Rect::new(50.0, 50.0, 150.0, 150.0),
            Rect::new(0.0, 0.0, 200.0, 200.0),
            1.0,
            0.0,
        );
        let params = CropParameters::new(dir.path().join("in.png"), &output)
            .with_format(OutputFormat::Png, 100);
        let result = service().execute(raster(100, 100), state, params).await;

        assert!(matches!(result, Err(TaskError::GeometryOutOfBounds(_))));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_copy_failure_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let params = CropParameters::new(
            dir.path().join("missing.jpg"),
            dir.path().join("out.jpg"),
        );
        let result = service()
            .execute(raster(10, 10), full_view(10.0, 10.0), params)
            .await;

        assert!(matches!(result, Err(TaskError::IoFailure(_))));
    }

    #[tokio::test]
    async fn test_crop_callback_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        std::fs::write(&input, b"source").unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = service().crop(
            raster(20, 20),
            full_view(20.0, 20.0),
            CropParameters::new(&input, dir.path().join("a.png")),
            move |result| {
                let _ = tx.send(result);
            },
        );
        assert!(rx.await.unwrap().is_ok());
        handle.join().await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let runner = TaskRunner::current();
        let cancelled = CropService::new(runner.clone(), CropConfig::default()).crop(
            raster(20, 20),
            full_view(20.0, 20.0),
            CropParameters::new(&input, dir.path().join("b.png")),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        cancelled.cancel();
        cancelled.join().await.unwrap();

        let (tx, rx) = oneshot::channel();
        runner.completion().post(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_output_uri() {
        let outcome = CropOutcome {
            output_path: PathBuf::from("/tmp/out.jpg"),
            offset_x: 0,
            offset_y: 0,
            width: 1,
            height: 1,
            recompressed: true,
        };
        assert_eq!(
            outcome.output_uri().map(|u| u.to_string()),
            Some("file:///tmp/out.jpg".to_string())
        );

        let relative = CropOutcome {
            output_path: PathBuf::from("out.jpg"),
            ..outcome
        };
        assert!(relative.output_uri().is_none());
    }
}
