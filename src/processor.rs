//! Request orchestration
//!
//! [`SegmentationPipeline`] wires the stages together: detection, per-box
//! segmentation with OR accumulation, rendering, then result assembly. Each
//! request is synchronous and sequential; the only shared state is the model
//! registry, whose engines are locked for the duration of each stage.

use crate::{
    assembly::{assemble, base_name},
    config::{ExecutionProvider, PipelineConfig},
    detection::detect,
    error::{MedsegError, Result},
    mask::BinaryMask,
    registry::ModelRegistry,
    render::{render_detections, render_overlay, LabelFont},
    segmentation::segment_all,
    services::ImageIOService,
    types::{summarize, Detection, PipelineOutput, ProcessingTimings},
};
use image::RgbImage;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, instrument, span, Level};

/// Everything one in-memory request produces
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Detector output in detector order
    pub detections: Vec<Detection>,
    /// OR of all per-detection masks, source dimensions
    pub unified_mask: BinaryMask,
    /// Source copy with boxes and labels
    pub detection_image: RgbImage,
    /// Source copy with the blue mask overlay
    pub overlay_image: RgbImage,
    /// One summary entry per detection
    pub summaries: Vec<String>,
    pub timings: ProcessingTimings,
}

/// Detection-then-segmentation pipeline over a shared model registry
#[derive(Debug)]
pub struct SegmentationPipeline {
    registry: ModelRegistry,
    font: Option<LabelFont>,
}

impl SegmentationPipeline {
    /// Build a pipeline around `registry`
    ///
    /// Models are not loaded here; the first request loads them. Labels use
    /// the configured font, or the embedded one.
    ///
    /// # Errors
    /// - `InvalidConfig` if the registry's configuration fails validation
    /// - `Io`/`InvalidConfig` if a configured label font cannot be loaded
    pub fn new(registry: ModelRegistry) -> Result<Self> {
        registry.config().validate()?;
        let font = LabelFont::load(registry.config().label_font.as_deref())?;
        Ok(Self {
            registry,
            font: Some(font),
        })
    }

    /// Build a pipeline without label text, regardless of configured fonts
    ///
    /// # Errors
    /// `InvalidConfig` if the registry's configuration fails validation
    pub fn without_labels(registry: ModelRegistry) -> Result<Self> {
        registry.config().validate()?;
        Ok(Self {
            registry,
            font: None,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        self.registry.config()
    }

    /// Run every in-memory stage on a decoded image
    ///
    /// # Errors
    /// - `ModelLoad` if the models cannot be loaded
    /// - `Detection` / `Segmentation` for stage failures
    /// - `InvalidConfig` for a confidence outside 0.0-1.0
    #[instrument(
        skip(self, image),
        fields(dimensions = %format!("{}x{}", image.width(), image.height()))
    )]
    pub fn process_image(
        &self,
        image: &RgbImage,
        device: ExecutionProvider,
        confidence_threshold: f32,
    ) -> Result<PipelineResult> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(MedsegError::config_value_error(
                "confidence threshold",
                confidence_threshold,
                "0.0-1.0",
            ));
        }

        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();
        let config = self.registry.config();
        let (detector, segmenter) = self.registry.get_models(device)?;

        let detections = {
            let _span =
                span!(Level::INFO, "detection", confidence = confidence_threshold).entered();
            let start = Instant::now();
            let mut detector = detector
                .lock()
                .map_err(|_| MedsegError::internal("detector lock poisoned"))?;
            let detections = detect(&mut **detector, image, confidence_threshold)?;
            timings.detection_ms = start.elapsed().as_millis() as u64;
            debug!(count = detections.len(), "detection complete");
            detections
        };

        let unified_mask = {
            let _span = span!(Level::INFO, "segmentation", detections = detections.len()).entered();
            let start = Instant::now();
            let mut segmenter = segmenter
                .lock()
                .map_err(|_| MedsegError::internal("segmenter lock poisoned"))?;
            let mask = segment_all(
                &mut **segmenter,
                image,
                &detections,
                config.segmentation_failure_policy,
            )?;
            timings.segmentation_ms = start.elapsed().as_millis() as u64;
            debug!(foreground = mask.foreground_pixels(), "segmentation complete");
            mask
        };

        let (detection_image, overlay_image) = {
            let _span = span!(Level::DEBUG, "rendering").entered();
            let start = Instant::now();
            let detection_image = render_detections(image, &detections, self.font.as_ref());
            let overlay_image = render_overlay(image, &unified_mask, config.overlay_opacity)?;
            timings.rendering_ms = start.elapsed().as_millis() as u64;
            (detection_image, overlay_image)
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;
        let summaries = summarize(&detections);

        Ok(PipelineResult {
            detections,
            unified_mask,
            detection_image,
            overlay_image,
            summaries,
            timings,
        })
    }

    /// Full request: decode `image_path`, run the stages, write both images
    ///
    /// `device` and `confidence_threshold` default to the configured values.
    ///
    /// # Errors
    /// Any stage error, unchanged; see [`MedsegError`]
    #[instrument(
        skip(self, image_path, output_dir),
        fields(image = %image_path.as_ref().display())
    )]
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        image_path: P,
        output_dir: Q,
        device: Option<ExecutionProvider>,
        confidence_threshold: Option<f32>,
    ) -> Result<PipelineOutput> {
        let total_start = Instant::now();
        let config = self.registry.config();
        let device = device.unwrap_or(config.device);
        let confidence = confidence_threshold.unwrap_or(config.confidence_threshold);

        let decode_start = Instant::now();
        let image = ImageIOService::load_image(image_path.as_ref())?;
        let image_decode_ms = decode_start.elapsed().as_millis() as u64;

        let result = self.process_image(&image, device, confidence)?;

        let output = {
            let _span = span!(Level::DEBUG, "assembly").entered();
            let start = Instant::now();
            let output = assemble(
                &base_name(image_path.as_ref()),
                &result.detection_image,
                &result.overlay_image,
                result.summaries,
                output_dir,
                config.output_format,
                config.jpeg_quality,
            )?;
            let assembly_ms = start.elapsed().as_millis() as u64;

            let timings = ProcessingTimings {
                image_decode_ms,
                assembly_ms,
                total_ms: total_start.elapsed().as_millis() as u64,
                ..result.timings
            };
            info!(
                detections = output.summaries.len(),
                timings = %timings.summary(),
                "request complete"
            );
            output
        };

        Ok(output)
    }
}

/// Run one request against `pipeline`
///
/// # Errors
/// See [`SegmentationPipeline::run`]
pub fn run_detection_and_segmentation<P: AsRef<Path>, Q: AsRef<Path>>(
    pipeline: &SegmentationPipeline,
    image_path: P,
    output_dir: Q,
    device: Option<ExecutionProvider>,
    confidence_threshold: Option<f32>,
) -> Result<PipelineOutput> {
    pipeline.run(image_path, output_dir, device, confidence_threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{
        raw_detection, MockDetector, MockMaskMode, MockModelFactory, MockSegmenter,
    };

    fn pipeline(factory: MockModelFactory) -> SegmentationPipeline {
        let registry = ModelRegistry::with_factory(PipelineConfig::default(), Box::new(factory));
        SegmentationPipeline::without_labels(registry).unwrap()
    }

    #[test]
    fn test_masks_cover_detected_boxes() {
        let factory = MockModelFactory::new().with_detector(MockDetector::new(vec![
            raw_detection([2.0, 2.0, 6.0, 6.0], 0, "glioma", 0.9),
            raw_detection([10.5, 0.0, 12.9, 3.0], 1, "meningioma", 0.6),
        ]));
        let image = RgbImage::new(16, 8);

        let result = pipeline(factory)
            .process_image(&image, ExecutionProvider::Cpu, 0.3)
            .unwrap();

        assert_eq!(result.summaries, vec!["glioma (90.0%)", "meningioma (60.0%)"]);
        assert_eq!(result.unified_mask.dimensions(), (16, 8));
        assert_eq!(result.unified_mask.foreground_pixels(), 16 + 6);
        assert_eq!(result.overlay_image.get_pixel(3, 3).0, [0, 0, 230]);
        assert_eq!(result.overlay_image.get_pixel(0, 7).0, [0, 0, 0]);
    }

    #[test]
    fn test_invalid_confidence_rejected_before_loading() {
        let factory = MockModelFactory::new();
        let counters = factory.counters();
        let pipeline = pipeline(factory);

        let err = pipeline
            .process_image(&RgbImage::new(4, 4), ExecutionProvider::Cpu, 1.5)
            .unwrap_err();

        assert!(matches!(err, MedsegError::InvalidConfig(_)));
        assert_eq!(counters.detector_loads(), 0);
    }

    #[test]
    fn test_segmentation_failure_aborts_by_default() {
        let factory = MockModelFactory::new()
            .with_detector(MockDetector::new(vec![raw_detection(
                [0.0, 0.0, 2.0, 2.0],
                0,
                "a",
                0.9,
            )]))
            .with_segmenter(MockSegmenter::new(MockMaskMode::FillBox).failing_on_call(0));

        let err = pipeline(factory)
            .process_image(&RgbImage::new(4, 4), ExecutionProvider::Cpu, 0.3)
            .unwrap_err();
        assert!(matches!(err, MedsegError::Segmentation(_)));
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = PipelineConfig {
            overlay_opacity: 2.0,
            ..PipelineConfig::default()
        };
        let registry = ModelRegistry::with_factory(config, Box::new(MockModelFactory::new()));
        assert!(matches!(
            SegmentationPipeline::without_labels(registry),
            Err(MedsegError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_pipeline_draws_labels() {
        let detections = vec![raw_detection([20.0, 40.0, 110.0, 70.0], 0, "glioma", 0.9)];
        let labelled = SegmentationPipeline::new(ModelRegistry::with_factory(
            PipelineConfig::default(),
            Box::new(MockModelFactory::new().with_detector(MockDetector::new(detections.clone()))),
        ))
        .unwrap();
        let plain = pipeline(
            MockModelFactory::new().with_detector(MockDetector::new(detections)),
        );
        let image = RgbImage::from_pixel(120, 80, image::Rgb([255, 255, 255]));

        let with_labels = labelled
            .process_image(&image, ExecutionProvider::Cpu, 0.3)
            .unwrap()
            .detection_image;
        let boxes_only = plain
            .process_image(&image, ExecutionProvider::Cpu, 0.3)
            .unwrap()
            .detection_image;

        // Label text lives in the rows above the box
        let differs_above_box = (0..120)
            .flat_map(|x| (0..40).map(move |y| (x, y)))
            .any(|(x, y)| with_labels.get_pixel(x, y) != boxes_only.get_pixel(x, y));
        assert!(differs_above_box);
    }
}
