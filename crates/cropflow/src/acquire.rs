//! Image acquisition: materialize, decode under a memory ceiling, normalize
//! orientation.

use std::path::PathBuf;
use std::sync::Arc;

use cropflow_core::decode::{
    decode_bounded, normalize_orientation, read_exif_info, ImageCrateDecoder, RasterDecoder,
};
use cropflow_core::{ExifInfo, WorkingRaster};

use crate::config::AcquisitionConfig;
use crate::error::TaskError;
use crate::runner::{run_blocking, CancelFlag, TaskHandle, TaskRunner};
use crate::source::{ContentResolver, ImageSource, Materializer};

/// What to load and how large it must stay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    /// Path, `file://`, `content://` or `http(s)://` reference.
    pub source: String,
    /// Where non-local sources are written. Required for those sources.
    pub destination: Option<PathBuf>,
    /// Minimum width the decoded raster should keep (0 = unconstrained).
    pub required_width: u32,
    /// Minimum height the decoded raster should keep (0 = unconstrained).
    pub required_height: u32,
}

impl LoadRequest {
    pub fn new(source: impl Into<String>, required_width: u32, required_height: u32) -> Self {
        Self {
            source: source.into(),
            destination: None,
            required_width,
            required_height,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Successful acquisition.
#[derive(Debug)]
pub struct LoadedImage {
    /// Upright raster, owned by the caller from here on.
    pub raster: WorkingRaster,
    /// Orientation found in the source.
    pub exif_info: ExifInfo,
    /// The file that was decoded: the destination for materialized sources.
    pub input_path: PathBuf,
    /// The destination from the request, if any.
    pub output_path: Option<PathBuf>,
}

/// Loads images off the calling context.
#[derive(Clone)]
pub struct AcquisitionService {
    runner: TaskRunner,
    config: AcquisitionConfig,
    materializer: Materializer,
    decoder: Arc<dyn RasterDecoder>,
}

impl std::fmt::Debug for AcquisitionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionService")
            .field("config", &self.config)
            .field("materializer", &self.materializer)
            .finish()
    }
}

impl AcquisitionService {
    /// Service backed by the `image` crate decoders.
    pub fn new(runner: TaskRunner, config: AcquisitionConfig) -> Result<Self, TaskError> {
        let materializer = Materializer::new(&config)?;
        let decoder: Arc<dyn RasterDecoder> = match config.decoder_alloc_limit {
            Some(limit) => Arc::new(ImageCrateDecoder::with_alloc_limit(limit)),
            None => Arc::new(ImageCrateDecoder::new()),
        };
        Ok(Self {
            runner,
            config,
            materializer,
            decoder,
        })
    }

    pub fn with_content_resolver(mut self, resolver: Arc<dyn ContentResolver>) -> Self {
        self.materializer = self.materializer.with_content_resolver(resolver);
        self
    }

    /// Replace the raster decoder.
    pub fn with_decoder(mut self, decoder: Arc<dyn RasterDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Load in the background and deliver the result on the completion
    /// context.
    pub fn load<C>(&self, request: LoadRequest, callback: C) -> TaskHandle
    where
        C: FnOnce(Result<LoadedImage, TaskError>) + Send + 'static,
    {
        let service = self.clone();
        self.runner.execute(
            move |cancel| async move { service.run(request, cancel).await },
            callback,
        )
    }

    /// Load and return the result directly.
    pub async fn acquire(&self, request: LoadRequest) -> Result<LoadedImage, TaskError> {
        self.run(request, CancelFlag::new()).await
    }

    async fn run(
        &self,
        request: LoadRequest,
        cancel: CancelFlag,
    ) -> Result<LoadedImage, TaskError> {
        let source = ImageSource::parse(&request.source)?;
        log::debug!("acquire: loading {}", source);

        let input_path = self
            .materializer
            .materialize(&source, request.destination.as_deref())
            .await?;

        let decoder = Arc::clone(&self.decoder);
        let budget = self.config.decode_budget();
        let path = input_path.clone();
        let (required_width, required_height) = (request.required_width, request.required_height);

        let (raster, exif_info) = run_blocking(move || {
            let raster = decode_bounded(
                decoder.as_ref(),
                &path,
                required_width,
                required_height,
                &budget,
                &|| cancel.is_cancelled(),
            )?;
            let exif_info = read_exif_info(&path);
            let raster = normalize_orientation(raster, &exif_info)?;
            Ok((raster, exif_info))
        })
        .await?;

        log::debug!(
            "acquire: {} decoded to {}x{} (orientation {})",
            input_path.display(),
            raster.width,
            raster.height,
            exif_info.orientation_code
        );

        Ok(LoadedImage {
            raster,
            exif_info,
            input_path,
            output_path: request.destination,
        })
    }
}
