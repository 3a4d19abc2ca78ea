//! Error propagation and boundary conditions
//!
//! Every failure surfaces to the caller as a typed `MedsegError`; nothing is
//! retried and no partial outputs are written.

mod common;

use common::{gradient_image, mock_pipeline, mock_pipeline_with_config, write_png};
use medseg::{
    backends::{mock::raw_detection, MockDetector, MockMaskMode, MockModelFactory, MockSegmenter},
    ExecutionProvider, MedsegError, PipelineConfig, SegmentationFailurePolicy,
};
use tempfile::TempDir;

fn two_detections() -> MockDetector {
    MockDetector::new(vec![
        raw_detection([0.0, 0.0, 4.0, 4.0], 0, "first", 0.9),
        raw_detection([6.0, 6.0, 10.0, 10.0], 1, "second", 0.8),
    ])
}

#[test]
fn test_missing_weights_fail_with_model_load() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_png(temp_dir.path(), "a.png", &gradient_image(8, 8));
    let out_dir = temp_dir.path().join("out");
    let factory = MockModelFactory::new().failing_detector_load();
    let counters = factory.counters();
    let pipeline = mock_pipeline(factory);

    let err = pipeline.run(&input, &out_dir, None, None).unwrap_err();

    assert!(matches!(err, MedsegError::ModelLoad(_)), "got {err:?}");
    assert!(err.to_string().contains("detector"));
    assert!(!out_dir.exists());
    assert!(!pipeline.registry().is_loaded());

    // Not cached: the next request tries again
    let _ = pipeline.run(&input, &out_dir, None, None);
    assert_eq!(counters.detector_loads(), 2);
}

#[test]
fn test_detector_failure_is_detection_error() {
    let pipeline = mock_pipeline(MockModelFactory::new().with_detector(MockDetector::failing()));

    let err = pipeline
        .process_image(&gradient_image(8, 8), ExecutionProvider::Cpu, 0.3)
        .unwrap_err();

    assert!(matches!(err, MedsegError::Detection(_)), "got {err:?}");
    assert_eq!(err.kind(), "detection");
}

#[test]
fn test_segmenter_failure_aborts_request() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_png(temp_dir.path(), "a.png", &gradient_image(12, 12));
    let out_dir = temp_dir.path().join("out");
    let factory = MockModelFactory::new()
        .with_detector(two_detections())
        .with_segmenter(MockSegmenter::new(MockMaskMode::FillBox).failing_on_call(1));
    let pipeline = mock_pipeline(factory);

    let err = pipeline.run(&input, &out_dir, None, None).unwrap_err();

    assert!(matches!(err, MedsegError::Segmentation(_)), "got {err:?}");
    assert!(!out_dir.exists());
}

#[test]
fn test_skip_policy_drops_failed_masks_only() {
    let config = PipelineConfig {
        segmentation_failure_policy: SegmentationFailurePolicy::Skip,
        ..PipelineConfig::default()
    };
    let factory = MockModelFactory::new()
        .with_detector(two_detections())
        .with_segmenter(MockSegmenter::new(MockMaskMode::FillBox).failing_on_call(0));
    let pipeline = mock_pipeline_with_config(config, factory);

    let result = pipeline
        .process_image(&gradient_image(12, 12), ExecutionProvider::Cpu, 0.3)
        .unwrap();

    // The detection stays in the summary; only its mask is missing
    assert_eq!(result.summaries.len(), 2);
    assert!(!result.unified_mask.get(1, 1));
    assert!(result.unified_mask.get(7, 7));
    assert_eq!(result.unified_mask.foreground_pixels(), 16);
}

#[test]
fn test_missing_image_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let pipeline = mock_pipeline(MockModelFactory::new());

    let err = pipeline
        .run(temp_dir.path().join("nope.png"), temp_dir.path(), None, None)
        .unwrap_err();

    assert!(matches!(err, MedsegError::Io(_)), "got {err:?}");
}

#[test]
fn test_undecodable_image_is_image_error() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("corrupt.png");
    std::fs::write(&input, b"definitely not a png").unwrap();
    let pipeline = mock_pipeline(MockModelFactory::new());

    let err = pipeline.run(&input, temp_dir.path().join("out"), None, None).unwrap_err();

    assert!(matches!(err, MedsegError::Image(_)), "got {err:?}");
}

#[test]
fn test_unwritable_output_dir_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let input = write_png(temp_dir.path(), "a.png", &gradient_image(4, 4));
    let blocker = temp_dir.path().join("blocker");
    std::fs::write(&blocker, b"file, not a directory").unwrap();
    let pipeline = mock_pipeline(MockModelFactory::new());

    let err = pipeline.run(&input, blocker.join("out"), None, None).unwrap_err();

    assert!(matches!(err, MedsegError::Io(_)), "got {err:?}");
}

#[test]
fn test_confidence_bounds() {
    let pipeline = mock_pipeline(MockModelFactory::new().with_detector(two_detections()));
    let image = gradient_image(12, 12);

    for invalid in [-0.1, 1.01, f32::NAN] {
        let err = pipeline
            .process_image(&image, ExecutionProvider::Cpu, invalid)
            .unwrap_err();
        assert!(matches!(err, MedsegError::InvalidConfig(_)), "{invalid} accepted");
    }

    let everything = pipeline.process_image(&image, ExecutionProvider::Cpu, 0.0).unwrap();
    assert_eq!(everything.detections.len(), 2);
    let nothing_below_one = pipeline.process_image(&image, ExecutionProvider::Cpu, 1.0).unwrap();
    assert!(nothing_below_one.detections.is_empty());
}

#[test]
fn test_boxes_outside_image_are_clipped() {
    let factory = MockModelFactory::new().with_detector(MockDetector::new(vec![raw_detection(
        [-5.0, -5.0, 50.0, 3.0],
        0,
        "edge",
        0.9,
    )]));
    let pipeline = mock_pipeline(factory);

    let result = pipeline
        .process_image(&gradient_image(10, 10), ExecutionProvider::Cpu, 0.3)
        .unwrap();

    assert_eq!(result.unified_mask.dimensions(), (10, 10));
    assert_eq!(result.unified_mask.foreground_pixels(), 30);
}

#[test]
fn test_single_pixel_image() {
    let factory = MockModelFactory::new().with_detector(MockDetector::new(vec![raw_detection(
        [0.0, 0.0, 1.0, 1.0],
        0,
        "dot",
        0.5,
    )]));
    let pipeline = mock_pipeline(factory);

    let result = pipeline
        .process_image(&gradient_image(1, 1), ExecutionProvider::Cpu, 0.3)
        .unwrap();

    assert!(result.unified_mask.get(0, 0));
    assert_eq!(result.summaries, vec!["dot (50.0%)"]);
}
