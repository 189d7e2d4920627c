//! Service configuration.
//!
//! Plain structs with production defaults; hosts may deserialize them from
//! whatever settings store they use.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use cropflow_core::decode::{DecodeBudget, DEFAULT_MAX_DECODE_ATTEMPTS, DEFAULT_MAX_RASTER_BYTES};
use cropflow_core::{FilterType, InterpolationFilter};

/// Acquisition configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Decoded rasters above this many bytes are retried at a coarser sample
    /// size (default: 100 MiB).
    pub max_raster_bytes: usize,
    /// Decode attempts before giving up (default: 10).
    pub max_decode_attempts: u32,
    /// Allocation cap for one decode attempt. An attempt whose buffers at
    /// the current sample size would exceed it counts as running out of
    /// memory (default: 256 MiB).
    pub decoder_alloc_limit: Option<u64>,
    /// Connection timeout for remote sources in seconds (default: 10s)
    pub connect_timeout: u64,
    /// Whole-request timeout for remote sources in seconds (default: 60s)
    pub request_timeout: u64,
    /// User-Agent sent with remote requests.
    pub user_agent: String,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_raster_bytes: DEFAULT_MAX_RASTER_BYTES,
            max_decode_attempts: DEFAULT_MAX_DECODE_ATTEMPTS,
            decoder_alloc_limit: Some(256 * 1024 * 1024),
            connect_timeout: 10,
            request_timeout: 60,
            user_agent: format!("cropflow/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl AcquisitionConfig {
    pub fn decode_budget(&self) -> DecodeBudget {
        DecodeBudget {
            max_raster_bytes: self.max_raster_bytes,
            max_attempts: self.max_decode_attempts,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

/// Crop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CropConfig {
    /// Filter for the bounded-output pre-downscale.
    pub resize_filter: FilterType,
    /// Interpolation for arbitrary-angle rotation.
    pub rotation_filter: InterpolationFilter,
}

/// Configuration for both services.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub acquisition: AcquisitionConfig,
    pub crop: CropConfig,
}
