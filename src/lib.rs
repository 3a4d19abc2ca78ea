#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # medseg
//!
//! Detection-then-segmentation pipeline for medical images.
//!
//! A detector proposes labelled bounding boxes; a promptable segmenter turns
//! each box into a binary mask; the masks are OR-combined into one unified
//! mask. Two images are produced per request: the source with blue detection
//! boxes and labels, and the source with the unified mask tinted blue.
//!
//! ## Features
//!
//! - **ONNX Runtime backends**: YOLO-style detector and SAM-style
//!   encoder/decoder segmenter, with CUDA, `CoreML` and CPU execution providers
//! - **Shared model registry**: models load once per process and are reused
//!   across requests
//! - **Deterministic outputs**: `{stem}_detection` / `{stem}_segmentation`
//!   files in PNG, JPEG, TIFF or WebP
//! - **CLI integration**: optional command-line host (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medseg::{ExecutionProvider, ModelRegistry, PipelineConfig, SegmentationPipeline};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::builder()
//!     .detector_weights("media/models/detector.onnx")
//!     .device(ExecutionProvider::Auto)
//!     .build()?;
//! let pipeline = SegmentationPipeline::new(ModelRegistry::new(config))?;
//!
//! let output = pipeline.run("scan01.png", "outputs", None, Some(0.4))?;
//! println!("{} / {}", output.detection_filename, output.segmentation_filename);
//! for finding in &output.summaries {
//!     println!("{finding}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backends
//! - `cli` (default): command-line host and tracing subscriber setup
//! - `webp-support` (default): WebP output
//! - `tracing-json`: JSON-formatted log output for the CLI
//!
//! Without `onnx`, pipelines are built through [`ModelRegistry::with_factory`]
//! with a custom [`ModelFactory`].

pub mod assembly;
pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod inference;
pub mod mask;
pub mod models;
pub mod processor;
pub mod registry;
pub mod render;
pub mod segmentation;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use assembly::{assemble, output_filenames};
pub use config::{
    ExecutionProvider, OutputFormat, PipelineConfig, PipelineConfigBuilder,
    SegmentationFailurePolicy,
};
pub use detection::detect;
pub use error::{MedsegError, Result};
pub use inference::{BoxSegmenter, Detector, RawDetection, SegmenterOutput};
pub use mask::BinaryMask;
pub use models::{ModelInfo, ModelRole, SegmenterWeights};
pub use processor::{run_detection_and_segmentation, PipelineResult, SegmentationPipeline};
pub use registry::{DetectorHandle, ModelFactory, ModelRegistry, SegmenterHandle};
pub use render::{render_detections, render_overlay, LabelFont};
pub use segmentation::{accumulate, segment, segment_all};
pub use services::{ImageIOService, OutputFormatHandler};
pub use types::{BoundingBox, Detection, PipelineOutput, ProcessingTimings};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat};

/// Run the in-memory stages on encoded image bytes
///
/// Suitable for servers receiving uploads: nothing is written to disk, and the
/// returned [`PipelineResult`] carries both rendered images.
///
/// ```rust,no_run
/// use medseg::{process_image_bytes, ModelRegistry, PipelineConfig, SegmentationPipeline};
///
/// # fn example(upload: Vec<u8>) -> anyhow::Result<()> {
/// let pipeline = SegmentationPipeline::new(ModelRegistry::new(PipelineConfig::default()))?;
/// let result = process_image_bytes(&pipeline, &upload)?;
/// println!("{} finding(s)", result.detections.len());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// - `Image` if the bytes cannot be decoded
/// - any stage error from [`SegmentationPipeline::process_image`]
pub fn process_image_bytes(
    pipeline: &SegmentationPipeline,
    bytes: &[u8],
) -> Result<PipelineResult> {
    let image = ImageIOService::load_from_bytes(bytes)?;
    let config = pipeline.config();
    pipeline.process_image(&image, config.device, config.confidence_threshold)
}
