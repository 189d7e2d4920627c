//! Failure taxonomy shared by the acquisition and crop services.

use cropflow_core::{
    DecodeError, EncodeError, GeometryError, MetadataError, TransformError,
};
use thiserror::Error;

/// Terminal failure of an acquisition or crop invocation.
///
/// Every failure is reported once, through the task's callback or as the
/// `Err` of the direct async call.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The source could not be opened, or a required destination is missing.
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// Reading, copying or writing bytes failed.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    /// The image header did not yield usable dimensions.
    #[error("Image bounds could not be read: {0}")]
    UnreadableBounds(String),

    /// Decoding failed for a reason other than memory pressure, or every
    /// retry ran out of memory.
    #[error("Decoding failed: {0}")]
    DecodeFailure(String),

    /// Raster, view state or parameters are unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The computed crop region does not fit the raster.
    #[error("Crop region out of bounds: {0}")]
    GeometryOutOfBounds(String),

    /// The source reference uses a scheme nobody can resolve.
    #[error("Unsupported source scheme: {0}")]
    UnsupportedScheme(String),

    /// The invocation observed its own cancellation.
    #[error("Task was cancelled")]
    Cancelled,

    /// The encoder rejected the output.
    #[error("Encoding failed: {0}")]
    Encode(String),
}

impl From<DecodeError> for TaskError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnreadableBounds(msg) => TaskError::UnreadableBounds(msg),
            DecodeError::Cancelled => TaskError::Cancelled,
            other => TaskError::DecodeFailure(other.to_string()),
        }
    }
}

impl From<GeometryError> for TaskError {
    fn from(err: GeometryError) -> Self {
        match err {
            GeometryError::OutOfBounds { .. } => TaskError::GeometryOutOfBounds(err.to_string()),
            other => TaskError::InvalidInput(other.to_string()),
        }
    }
}

impl From<TransformError> for TaskError {
    fn from(err: TransformError) -> Self {
        TaskError::InvalidInput(err.to_string())
    }
}

impl From<EncodeError> for TaskError {
    fn from(err: EncodeError) -> Self {
        TaskError::Encode(err.to_string())
    }
}

impl From<MetadataError> for TaskError {
    fn from(err: MetadataError) -> Self {
        TaskError::Encode(err.to_string())
    }
}

impl From<tokio::task::JoinError> for TaskError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            TaskError::Cancelled
        } else {
            TaskError::IoFailure(std::io::Error::other(err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cropflow_core::Rect;

    #[test]
    fn test_decode_error_mapping() {
        assert!(matches!(
            TaskError::from(DecodeError::UnreadableBounds("x".into())),
            TaskError::UnreadableBounds(_)
        ));
        assert!(matches!(
            TaskError::from(DecodeError::OutOfMemory),
            TaskError::DecodeFailure(_)
        ));
        assert!(matches!(
            TaskError::from(DecodeError::AttemptsExhausted {
                attempts: 10,
                sample_size: 1024
            }),
            TaskError::DecodeFailure(_)
        ));
        assert!(matches!(
            TaskError::from(DecodeError::Cancelled),
            TaskError::Cancelled
        ));
    }

    #[test]
    fn test_geometry_error_mapping() {
        let oob = GeometryError::OutOfBounds {
            x: -5,
            y: 0,
            width: 10,
            height: 10,
            raster_width: 8,
            raster_height: 8,
        };
        assert!(matches!(
            TaskError::from(oob),
            TaskError::GeometryOutOfBounds(_)
        ));
        assert!(matches!(
            TaskError::from(GeometryError::EmptyImageRect(Rect::default())),
            TaskError::InvalidInput(_)
        ));
        assert!(matches!(
            TaskError::from(GeometryError::InvalidScale(0.0)),
            TaskError::InvalidInput(_)
        ));
    }

    #[test]
    fn test_io_error_conversion() {
        let err: TaskError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, TaskError::IoFailure(_)));
        assert!(err.to_string().contains("gone"));
    }
}
