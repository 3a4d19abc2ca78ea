//! Shared helpers for the integration tests

#![allow(dead_code)]

use image::{Rgb, RgbImage};
use medseg::{
    backends::MockModelFactory, ImageIOService, ModelRegistry, OutputFormat, PipelineConfig,
    SegmentationPipeline,
};
use std::path::{Path, PathBuf};

/// Pipeline over mock engines, without label text
pub fn mock_pipeline(factory: MockModelFactory) -> SegmentationPipeline {
    mock_pipeline_with_config(PipelineConfig::default(), factory)
}

pub fn mock_pipeline_with_config(
    config: PipelineConfig,
    factory: MockModelFactory,
) -> SegmentationPipeline {
    let registry = ModelRegistry::with_factory(config, Box::new(factory));
    SegmentationPipeline::without_labels(registry).expect("valid test configuration")
}

/// Image whose channels vary with position so pixel comparisons are meaningful
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 17 % 256) as u8,
            (y * 29 % 256) as u8,
            ((x + y) * 7 % 256) as u8,
        ])
    })
}

/// Write `image` as PNG under `dir` and return its path
pub fn write_png(dir: &Path, name: &str, image: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    ImageIOService::save_image(image, &path, OutputFormat::Png, 90).expect("write test image");
    path
}
