//! Error types for the detection and segmentation pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, MedsegError>;

/// Error taxonomy for the pipeline
///
/// Every variant aborts the request that produced it. Nothing in the library
/// retries or recovers; user-facing messaging is the host's job.
#[derive(Error, Debug)]
pub enum MedsegError {
    /// Detector or segmenter weights missing, unreadable or rejected by the runtime
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Detector inference or output decoding failed
    #[error("Detection error: {0}")]
    Detection(String),

    /// Segmenter invocation or mask extraction failed
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Filesystem errors (missing input, unwritable output directory, ...)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode or encode errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MedsegError {
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoad(msg.into())
    }

    pub fn detection<S: Into<String>>(msg: S) -> Self {
        Self::Detection(msg.into())
    }

    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {operation} '{path_display}': {error}"),
        ))
    }

    /// Create model load error with the offending weights path
    pub fn model_load_error<P: AsRef<std::path::Path>>(
        role: &str,
        weights_path: P,
        error: &str,
    ) -> Self {
        Self::ModelLoad(format!(
            "Failed to load {role} weights '{}': {error}",
            weights_path.as_ref().display()
        ))
    }

    /// Create configuration error with the valid range
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {parameter}: {value} (valid range: {valid_range})"
        ))
    }

    /// Short machine-readable name of the error class
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModelLoad(_) => "model_load",
            Self::Detection(_) => "detection",
            Self::Segmentation(_) => "segmentation",
            Self::Io(_) => "io",
            Self::Image(_) => "image",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Internal(_) => "internal",
        }
    }
}
