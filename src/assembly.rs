//! Result assembly: write both images and report their names

use crate::{
    config::OutputFormat,
    error::{MedsegError, Result},
    services::{ImageIOService, OutputFormatHandler},
    types::PipelineOutput,
};
use image::RgbImage;
use std::path::Path;

/// Deterministic output names for an input image path
///
/// `scans/scan01.jpg` with PNG output gives
/// `("scan01_detection.png", "scan01_segmentation.png")`.
///
/// ```rust
/// use medseg::{assembly::output_filenames, OutputFormat};
///
/// let (det, seg) = output_filenames("uploads/scan01.jpg", OutputFormat::Png);
/// assert_eq!(det, "scan01_detection.png");
/// assert_eq!(seg, "scan01_segmentation.png");
/// ```
pub fn output_filenames<P: AsRef<Path>>(image_path: P, format: OutputFormat) -> (String, String) {
    let stem = base_name(image_path.as_ref());
    let ext = OutputFormatHandler::get_extension(format);
    (
        format!("{stem}_detection.{ext}"),
        format!("{stem}_segmentation.{ext}"),
    )
}

/// File stem of `path`, or `"image"` when it has none
#[must_use]
pub fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "image".to_string())
}

/// Write the detection and overlay images under `output_dir`
///
/// The directory is created (with parents) if missing; existing files with
/// the same names are overwritten. `summaries` is returned unchanged.
///
/// # Errors
/// - `Io` if the directory cannot be created or a file cannot be written
/// - `Image` if encoding fails
pub fn assemble<P: AsRef<Path>>(
    base_name: &str,
    detection_image: &RgbImage,
    overlay_image: &RgbImage,
    summaries: Vec<String>,
    output_dir: P,
    format: OutputFormat,
    jpeg_quality: u8,
) -> Result<PipelineOutput> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir)
        .map_err(|e| MedsegError::file_io_error("create output directory", output_dir, &e))?;

    let ext = OutputFormatHandler::get_extension(format);
    let detection_filename = format!("{base_name}_detection.{ext}");
    let segmentation_filename = format!("{base_name}_segmentation.{ext}");

    ImageIOService::save_image(
        detection_image,
        output_dir.join(&detection_filename),
        format,
        jpeg_quality,
    )?;
    ImageIOService::save_image(
        overlay_image,
        output_dir.join(&segmentation_filename),
        format,
        jpeg_quality,
    )?;

    tracing::debug!(
        dir = %output_dir.display(),
        detection = %detection_filename,
        segmentation = %segmentation_filename,
        "wrote result images"
    );

    Ok(PipelineOutput {
        detection_filename,
        segmentation_filename,
        summaries,
    })
}
