//! Error taxonomy for payload registration, device control and stream lifecycle.
//!
//! Configuration-shape errors (`DuplicateEndpoint`, `DanglingCameraReference`,
//! `AlreadyRegistered`) are raised at registration time and leave the payload
//! untouched. Pipeline errors only affect the stream that raised them.

use thiserror::Error;

use crate::payload::capability::{DeviceClass, FeatureFlag};

/// Convenience alias used across the crate.
pub type PayloadResult<T> = std::result::Result<T, PayloadError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("'{device}' does not support {operation} (requires {required:?})")]
    UnsupportedCapability {
        device: String,
        operation: &'static str,
        required: Vec<FeatureFlag>,
    },

    #[error("{0} is not supported while the stream is playing")]
    UnsupportedAtRuntime(&'static str),

    #[error("{class} #{index} is referenced by active stream '{stream}'")]
    DeviceInUse {
        class: DeviceClass,
        index: usize,
        stream: String,
    },

    #[error("endpoint {endpoint} is already bound to stream '{existing}'")]
    DuplicateEndpoint { endpoint: String, existing: String },

    #[error("stream '{stream}' references camera #{index}, but only {registered} camera(s) are registered")]
    DanglingCameraReference {
        stream: String,
        index: usize,
        registered: usize,
    },

    #[error("stream '{0}' is already running")]
    AlreadyRunning(String),

    #[error("'{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("failed to build pipeline: {0}")]
    PipelineBuildError(String),

    #[error("stage '{stage}' failed to acquire resources: {reason}")]
    ResourceAcquisitionFailure { stage: String, reason: String },

    #[error("stage '{stage}' failed while playing: {reason}")]
    StageFailed { stage: String, reason: String },
}

impl PayloadError {
    /// True for errors that abort a single stream run, as opposed to
    /// registration or device errors.
    pub fn is_pipeline_error(&self) -> bool {
        matches!(
            self,
            PayloadError::PipelineBuildError(_)
                | PayloadError::ResourceAcquisitionFailure { .. }
                | PayloadError::StageFailed { .. }
        )
    }
}
