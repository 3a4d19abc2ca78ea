//! Output format handling service

use crate::config::OutputFormat;
use image::ImageFormat;

/// Service mapping [`OutputFormat`] onto extensions and encoders
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// File extension (without the dot) for a given output format
    ///
    /// ```rust
    /// use medseg::{services::OutputFormatHandler, OutputFormat};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Jpeg), "jpg");
    /// ```
    #[must_use]
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebP => "webp",
            OutputFormat::Tiff => "tiff",
        }
    }

    /// Encoder format for the `image` crate
    #[must_use]
    pub fn image_format(format: OutputFormat) -> ImageFormat {
        match format {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::WebP => ImageFormat::WebP,
            OutputFormat::Tiff => ImageFormat::Tiff,
        }
    }

    /// Human-readable format name for messages
    #[must_use]
    pub fn display_name(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "PNG",
            OutputFormat::Jpeg => "JPEG",
            OutputFormat::WebP => "WebP",
            OutputFormat::Tiff => "TIFF",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_extension() {
        assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
        assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Jpeg), "jpg");
        assert_eq!(OutputFormatHandler::get_extension(OutputFormat::WebP), "webp");
        assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Tiff), "tiff");
    }

    #[test]
    fn test_extension_matches_image_format() {
        for format in [
            OutputFormat::Png,
            OutputFormat::Jpeg,
            OutputFormat::WebP,
            OutputFormat::Tiff,
        ] {
            let ext = OutputFormatHandler::get_extension(format);
            assert_eq!(
                ImageFormat::from_extension(ext),
                Some(OutputFormatHandler::image_format(format))
            );
        }
    }
}
