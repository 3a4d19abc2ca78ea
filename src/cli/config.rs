//! Conversion of CLI arguments into a pipeline configuration

use crate::cli::main_impl::{Cli, CliOutputFormat};
use crate::{
    config::{ExecutionProvider, OutputFormat, PipelineConfig, SegmentationFailurePolicy},
    models::SegmenterWeights,
};
use anyhow::{Context, Result};

/// Builds a [`PipelineConfig`] from an optional JSON file plus CLI overrides
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Load the base configuration and apply every flag the user passed
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let mut config = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(device) = &cli.device {
            config.device = device
                .parse::<ExecutionProvider>()
                .with_context(|| format!("Invalid device '{device}'"))?;
        }
        if let Some(confidence) = cli.confidence {
            config.confidence_threshold = confidence;
        }
        if let Some(format) = cli.format {
            config.output_format = Self::output_format(format);
        }
        if let Some(quality) = cli.jpeg_quality {
            config.jpeg_quality = quality;
        }
        if let Some(path) = &cli.detector {
            config.detector_weights.clone_from(path);
        }
        if cli.sam_encoder.is_some() || cli.sam_decoder.is_some() {
            let defaults = config.segmenter_weights.clone();
            config.segmenter_weights = SegmenterWeights::new(
                cli.sam_encoder.clone().unwrap_or(defaults.encoder),
                cli.sam_decoder.clone().unwrap_or(defaults.decoder),
            );
        }
        if let Some(threads) = cli.threads {
            config.set_num_threads(threads);
        }
        if let Some(font) = &cli.font {
            config.label_font = Some(font.clone());
        }
        if cli.skip_failed_segmentations {
            config.segmentation_failure_policy = SegmentationFailurePolicy::Skip;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub(crate) fn output_format(format: CliOutputFormat) -> OutputFormat {
        match format {
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Jpeg => OutputFormat::Jpeg,
            CliOutputFormat::Webp => OutputFormat::WebP,
            CliOutputFormat::Tiff => OutputFormat::Tiff,
        }
    }
}
