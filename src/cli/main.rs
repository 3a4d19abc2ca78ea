//! Medical image detection and segmentation CLI
//!
//! Runs the detection-then-segmentation pipeline over files and directories,
//! writing `{stem}_detection` and `{stem}_segmentation` images per input.

use super::config::CliConfigBuilder;
use crate::{
    error::MedsegError, processor::SegmentationPipeline, registry::ModelRegistry,
    services::ImageIOService, types::PipelineOutput,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Detect findings in medical images and segment each detected region
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "medseg")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required_unless_present = "show_providers")]
    pub inputs: Vec<PathBuf>,

    /// Directory receiving the result images
    #[arg(short, long, value_name = "DIR", default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Execution device (auto, cpu, cuda, cuda:N, coreml) [default: from config or cpu]
    #[arg(short, long)]
    pub device: Option<String>,

    /// Minimum detection confidence (0.0-1.0) [default: from config or 0.3]
    #[arg(short, long)]
    pub confidence: Option<f32>,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output image format [default: from config or png]
    #[arg(short, long, value_enum)]
    pub format: Option<CliOutputFormat>,

    /// JPEG quality (0-100)
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Total inference threads; a quarter go to inter-op (0 = auto-detect)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Detector weights (ONNX)
    #[arg(long, value_name = "PATH")]
    pub detector: Option<PathBuf>,

    /// Segmenter image encoder weights (ONNX)
    #[arg(long, value_name = "PATH")]
    pub sam_encoder: Option<PathBuf>,

    /// Segmenter prompt decoder weights (ONNX)
    #[arg(long, value_name = "PATH")]
    pub sam_decoder: Option<PathBuf>,

    /// TrueType/OpenType font for detection labels
    #[arg(long, value_name = "PATH")]
    pub font: Option<PathBuf>,

    /// Leave out detections whose segmentation fails instead of failing the image
    #[arg(long)]
    pub skip_failed_segmentations: bool,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print a JSON report to stdout
    #[arg(long)]
    pub json: bool,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Jpeg,
    Webp,
    Tiff,
}

/// Per-input entry of the JSON report
#[derive(Debug, Serialize)]
struct FileReport {
    input: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<PipelineOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
}

/// Main CLI entry point
///
/// # Errors
/// Invalid arguments or configuration, model loading failures, or any input
/// that failed to process
pub fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    let config = CliConfigBuilder::from_cli(&cli)?;
    debug!(?config, "configuration resolved");

    let pipeline = build_pipeline(config)?;
    let inputs = collect_inputs(&cli.inputs, cli.recursive)?;
    if inputs.is_empty() {
        anyhow::bail!("No supported images found in the given inputs");
    }
    info!(count = inputs.len(), output_dir = %cli.output_dir.display(), "processing inputs");

    let start = Instant::now();
    let reports = process_inputs(&pipeline, &inputs, &cli.output_dir);
    let failed = reports.iter().filter(|r| r.error.is_some()).count();

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialize report")?
        );
    } else {
        print_reports(&reports, &cli.output_dir);
    }

    info!(
        processed = reports.len() - failed,
        failed,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "done"
    );

    if failed > 0 {
        anyhow::bail!("{failed} of {} input(s) failed", reports.len());
    }
    Ok(())
}

fn init_tracing(verbose_count: u8) -> Result<()> {
    use crate::tracing_config::{TracingConfig, TracingFormat};

    TracingConfig::new()
        .with_verbosity(verbose_count)
        .with_format(TracingFormat::Console)
        .with_env_override()
        .init()
        .context("Failed to initialize tracing subscriber")?;

    debug!(verbosity = verbose_count, "tracing initialized");
    Ok(())
}

#[cfg(feature = "onnx")]
fn build_pipeline(config: crate::config::PipelineConfig) -> Result<SegmentationPipeline> {
    let registry = ModelRegistry::new(config);
    SegmentationPipeline::new(registry).context("Failed to set up the pipeline")
}

#[cfg(not(feature = "onnx"))]
fn build_pipeline(_config: crate::config::PipelineConfig) -> Result<SegmentationPipeline> {
    anyhow::bail!("No inference backend enabled. Please rebuild with --features onnx")
}

#[cfg(feature = "onnx")]
fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores detected");
    println!("\nExecution providers:");
    for (name, available, description) in crate::backends::list_providers() {
        let status = if available { "available" } else { "not available" };
        println!("  {name}: {status} - {description}");
    }
    println!("\nUsage examples:");
    println!("  --device auto     # CUDA, then CoreML, then CPU");
    println!("  --device cuda:0   # NVIDIA CUDA");
    println!("  --device coreml   # Apple CoreML");
    println!("  --device cpu      # CPU execution (default)");
}

#[cfg(not(feature = "onnx"))]
fn show_provider_diagnostics() {
    println!("No inference backend enabled; only the CPU device is meaningful");
}

/// Expand files and directories into a deduplicated list of image paths
///
/// Explicit file arguments are kept even with an unknown extension; directory
/// contents are filtered by extension and sorted.
fn collect_inputs(inputs: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            files.extend(find_image_files(input, recursive)?);
        } else {
            files.push(input.clone());
        }
    }

    let mut seen = std::collections::HashSet::new();
    files.retain(|path| seen.insert(path.clone()));
    Ok(files)
}

fn find_image_files(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry.with_context(|| format!("Failed to read directory {}", dir.display()))?;
        if entry.file_type().is_file() && ImageIOService::is_supported_format(entry.path()) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

fn process_inputs(
    pipeline: &SegmentationPipeline,
    inputs: &[PathBuf],
    output_dir: &Path,
) -> Vec<FileReport> {
    inputs
        .iter()
        .map(|input| match pipeline.run(input, output_dir, None, None) {
            Ok(output) => FileReport {
                input: input.clone(),
                output: Some(output),
                error: None,
                error_kind: None,
            },
            Err(e) => {
                log_failure(input, &e);
                FileReport {
                    input: input.clone(),
                    output: None,
                    error: Some(e.to_string()),
                    error_kind: Some(e.kind()),
                }
            },
        })
        .collect()
}

fn log_failure(input: &Path, e: &MedsegError) {
    match e {
        MedsegError::ModelLoad(_) | MedsegError::InvalidConfig(_) => {
            error!(input = %input.display(), kind = e.kind(), "{e}");
        },
        _ => warn!(input = %input.display(), kind = e.kind(), "{e}"),
    }
}

fn print_reports(reports: &[FileReport], output_dir: &Path) {
    for report in reports {
        match (&report.output, &report.error) {
            (Some(output), _) => {
                println!("{}", report.input.display());
                let detection = output_dir.join(&output.detection_filename);
                let segmentation = output_dir.join(&output.segmentation_filename);
                println!("  detection:    {}", detection.display());
                println!("  segmentation: {}", segmentation.display());
                if output.summaries.is_empty() {
                    println!("  findings:     none");
                } else {
                    println!("  findings:     {}", output.summaries.join(", "));
                }
            },
            (None, Some(err)) => println!("{}\n  failed: {err}", report.input.display()),
            (None, None) => {},
        }
    }
}
