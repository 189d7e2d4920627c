//! cropflow - cancellable async image acquisition and crop services
//!
//! This crate runs the `cropflow-core` pipeline on a tokio runtime and
//! delivers each invocation's terminal result on a serialized completion
//! context.
//!
//! # Module Structure
//!
//! - `source` - Source references and materialization (HTTP, content, file)
//! - `acquire` - Acquisition service: materialize, bounded decode, orientation
//! - `crop` - Crop service: geometry, copy-vs-crop, encode, EXIF carry-over
//! - `runner` - Task runner, completion context and cancellable handles
//! - `config` - Service configuration
//! - `error` - Failure taxonomy
//!
//! # Usage
//!
//! ```ignore
//! let runner = TaskRunner::current();
//! let config = ServiceConfig::default();
//! let acquisition = AcquisitionService::new(runner.clone(), config.acquisition)?;
//! let crops = CropService::new(runner, config.crop);
//!
//! let loaded = acquisition
//!     .acquire(LoadRequest::new("https://example.com/p.jpg", 1080, 1080).with_destination(tmp))
//!     .await?;
//! let params = CropParameters::new(&loaded.input_path, out).with_exif_info(loaded.exif_info);
//! let handle = crops.crop(loaded.raster, view_state, params, |result| {
//!     // runs on the completion context
//! });
//! ```

mod acquire;
mod config;
mod crop;
mod error;
mod runner;
mod source;

pub use acquire::{AcquisitionService, LoadRequest, LoadedImage};
pub use config::{AcquisitionConfig, CropConfig, ServiceConfig};
pub use crop::{CropOutcome, CropParameters, CropService};
pub use error::TaskError;
pub use runner::{CancelFlag, CompletionContext, TaskHandle, TaskRunner};
pub use source::{ContentResolver, ImageSource, Materializer, CONTENT_SCHEME};

// Re-export the core types that appear in the service APIs
pub use cropflow_core::{ExifInfo, ImageState, OutputFormat, Rect, WorkingRaster};
