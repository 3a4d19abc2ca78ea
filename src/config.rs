//! Configuration types for the detection and segmentation pipeline

use crate::error::{MedsegError, Result};
use crate::models::SegmenterWeights;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default detector weights, relative to the working directory
pub const DEFAULT_DETECTOR_WEIGHTS: &str = "media/models/detector.onnx";
/// Default confidence threshold handed to the detector
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.3;
/// Default overlay opacity for the segmentation image
pub const DEFAULT_OVERLAY_OPACITY: f64 = 0.9;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    Auto,
    /// CPU execution (always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl FromStr for ExecutionProvider {
    type Err = MedsegError;

    /// Accepts the device strings hosts usually pass around: `cpu`, `cuda`,
    /// `cuda:<index>`, `coreml`, `mps` and `auto`.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "coreml" | "mps" => Ok(Self::CoreMl),
            "cuda" => Ok(Self::Cuda),
            other if other.starts_with("cuda:") => Ok(Self::Cuda),
            other => Err(MedsegError::invalid_config(format!(
                "Unknown device '{other}'. Expected one of: auto, cpu, cuda, coreml"
            ))),
        }
    }
}

/// Output image format for the two rendered artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless PNG (default)
    #[default]
    Png,
    /// JPEG at the configured quality
    Jpeg,
    /// Lossless TIFF
    Tiff,
    /// WebP (requires the `webp-support` feature)
    WebP,
}

/// What to do when the segmenter fails on one detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationFailurePolicy {
    /// Abort the whole request with a segmentation error
    #[default]
    Abort,
    /// Log the failure, keep the detection's box and summary, contribute no mask
    Skip,
}

/// Configuration for the pipeline and the models it loads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Detector ONNX weights
    pub detector_weights: PathBuf,

    /// Segmenter encoder/decoder ONNX weights
    pub segmenter_weights: SegmenterWeights,

    /// Device the models are bound to on first load
    pub device: ExecutionProvider,

    /// Detector confidence threshold (0.0-1.0)
    pub confidence_threshold: f32,

    /// IoU threshold for the detector's non-maximum suppression (0.0-1.0]
    pub iou_threshold: f32,

    /// Square input edge of the detector, in pixels
    pub detector_input_size: u32,

    /// Upper bound on detections kept per image
    pub max_detections: usize,

    /// Class names indexed by class id
    ///
    /// Empty means the names stored in the detector's `names` metadata.
    /// Ids covered by neither render as `class_<id>`.
    pub class_names: Vec<String>,

    /// Overlay opacity for masked pixels (0.0-1.0)
    pub overlay_opacity: f64,

    /// Output format of the detection and segmentation images
    pub output_format: OutputFormat,

    /// JPEG quality (0-100, only used for JPEG output)
    pub jpeg_quality: u8,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// TrueType font for detection labels (None = embedded DejaVu Sans)
    pub label_font: Option<PathBuf>,

    /// Per-detection segmentation failure handling
    pub segmentation_failure_policy: SegmentationFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector_weights: PathBuf::from(DEFAULT_DETECTOR_WEIGHTS),
            segmenter_weights: SegmenterWeights::default(),
            device: ExecutionProvider::Cpu,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: 0.45,
            detector_input_size: 640,
            max_detections: 300,
            class_names: Vec::new(),
            overlay_opacity: DEFAULT_OVERLAY_OPACITY,
            output_format: OutputFormat::Png,
            jpeg_quality: 90,
            intra_threads: 0,
            inter_threads: 0,
            label_font: None,
            segmentation_failure_policy: SegmentationFailurePolicy::Abort,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    ///
    /// ```rust
    /// use medseg::{ExecutionProvider, PipelineConfig};
    ///
    /// let config = PipelineConfig::builder()
    ///     .device(ExecutionProvider::Cpu)
    ///     .confidence_threshold(0.5)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.confidence_threshold, 0.5);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load a configuration from a JSON file; missing keys take their defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - JSON is malformed or has wrong value types
    /// - Values fail [`PipelineConfig::validate`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| MedsegError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            MedsegError::invalid_config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Confidence threshold or overlay opacity outside 0.0-1.0
    /// - IoU threshold outside (0.0, 1.0]
    /// - JPEG quality above 100
    /// - Detector input size zero or not a multiple of 32
    /// - `max_detections` of zero
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(MedsegError::config_value_error(
                "confidence threshold",
                self.confidence_threshold,
                "0.0-1.0",
            ));
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(MedsegError::config_value_error(
                "IoU threshold",
                self.iou_threshold,
                "(0.0, 1.0]",
            ));
        }
        if !(0.0..=1.0).contains(&self.overlay_opacity) {
            return Err(MedsegError::config_value_error(
                "overlay opacity",
                self.overlay_opacity,
                "0.0-1.0",
            ));
        }
        if self.jpeg_quality > 100 {
            return Err(MedsegError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "0-100",
            ));
        }
        if self.detector_input_size == 0 || self.detector_input_size % 32 != 0 {
            return Err(MedsegError::config_value_error(
                "detector input size",
                self.detector_input_size,
                "positive multiple of 32",
            ));
        }
        if self.max_detections == 0 {
            return Err(MedsegError::config_value_error(
                "max detections",
                self.max_detections,
                "1 or more",
            ));
        }
        Ok(())
    }

    /// Split one thread total into intra and inter threads (0 = auto)
    ///
    /// Intra-op gets the whole total; inter-op gets a quarter, at least one.
    pub fn set_num_threads(&mut self, threads: usize) {
        self.intra_threads = threads;
        self.inter_threads = if threads > 0 { (threads / 4).max(1) } else { 0 };
    }

    /// Resolve a class id to its display name
    #[must_use]
    pub fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }
}

/// Builder for [`PipelineConfig`]
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn detector_weights<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.detector_weights = path.into();
        self
    }

    #[must_use]
    pub fn segmenter_weights(mut self, weights: SegmenterWeights) -> Self {
        self.config.segmenter_weights = weights;
        self
    }

    #[must_use]
    pub fn device(mut self, device: ExecutionProvider) -> Self {
        self.config.device = device;
        self
    }

    #[must_use]
    pub fn confidence_threshold(mut self, threshold: f32) -> Self {
        self.config.confidence_threshold = threshold;
        self
    }

    #[must_use]
    pub fn iou_threshold(mut self, threshold: f32) -> Self {
        self.config.iou_threshold = threshold;
        self
    }

    #[must_use]
    pub fn detector_input_size(mut self, size: u32) -> Self {
        self.config.detector_input_size = size;
        self
    }

    #[must_use]
    pub fn max_detections(mut self, max: usize) -> Self {
        self.config.max_detections = max;
        self
    }

    #[must_use]
    pub fn class_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.class_names = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn overlay_opacity(mut self, opacity: f64) -> Self {
        self.config.overlay_opacity = opacity;
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(0, 100);
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    /// Set both intra and inter threads from one total (0 = auto)
    #[must_use]
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.set_num_threads(threads);
        self
    }

    #[must_use]
    pub fn label_font<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.label_font = Some(path.into());
        self
    }

    #[must_use]
    pub fn segmentation_failure_policy(mut self, policy: SegmentationFailurePolicy) -> Self {
        self.config.segmentation_failure_policy = policy;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// Any rule of [`PipelineConfig::validate`] is violated
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
