//! Image file input/output service

use crate::{
    config::OutputFormat,
    error::{MedsegError, Result},
    services::format::OutputFormatHandler,
};
use image::{codecs::jpeg::JpegEncoder, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from disk as 8-bit RGB
    ///
    /// Falls back to content sniffing when the extension is missing or wrong.
    ///
    /// # Errors
    /// - `Io` if the file does not exist or cannot be read
    /// - `Image` if the content cannot be decoded
    ///
    /// ```rust,no_run
    /// use medseg::services::ImageIOService;
    ///
    /// let image = ImageIOService::load_image("scan01.jpg")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(MedsegError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        let image = match image::open(path_ref) {
            Ok(img) => img,
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {e}. \
                     Attempting content-based detection.",
                    path_ref.display()
                );
                let data = std::fs::read(path_ref).map_err(|io_err| {
                    MedsegError::file_io_error("read image data", path_ref, &io_err)
                })?;
                image::load_from_memory(&data)?
            },
        };

        Ok(image.to_rgb8())
    }

    /// Decode an in-memory image as 8-bit RGB
    ///
    /// # Errors
    /// `Image` if the bytes are not a decodable image
    pub fn load_from_bytes(bytes: &[u8]) -> Result<RgbImage> {
        Ok(image::load_from_memory(bytes)?.to_rgb8())
    }

    /// Write `image` to `path` in `format`, overwriting any existing file
    ///
    /// `jpeg_quality` only applies to JPEG output.
    ///
    /// # Errors
    /// - `Io` if the file cannot be created
    /// - `Image` if encoding fails
    pub fn save_image<P: AsRef<Path>>(
        image: &RgbImage,
        path: P,
        format: OutputFormat,
        jpeg_quality: u8,
    ) -> Result<()> {
        let path_ref = path.as_ref();

        match format {
            OutputFormat::Jpeg => {
                let file = File::create(path_ref)
                    .map_err(|e| MedsegError::file_io_error("create image file", path_ref, &e))?;
                let encoder = JpegEncoder::new_with_quality(BufWriter::new(file), jpeg_quality);
                image.write_with_encoder(encoder)?;
            },
            OutputFormat::Png | OutputFormat::Tiff | OutputFormat::WebP => {
                image.save_with_format(path_ref, OutputFormatHandler::image_format(format))?;
            },
        }

        log::debug!(
            "Saved {} as {}",
            path_ref.display(),
            OutputFormatHandler::display_name(format)
        );
        Ok(())
    }

    /// Whether `path` has an input image extension the decoder handles
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .is_some_and(|ext| {
                matches!(
                    ext.as_str(),
                    "jpg" | "jpeg" | "png" | "webp" | "tiff" | "tif"
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 7) as u8, (y * 5) as u8, 128]))
    }

    #[test]
    fn test_load_nonexistent_file() {
        let err = ImageIOService::load_image("/nonexistent/scan.png").unwrap_err();
        assert!(matches!(err, MedsegError::Io(_)));
    }

    #[test]
    fn test_load_garbage_is_image_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scan.png");
        std::fs::write(&path, b"not an image").unwrap();

        let err = ImageIOService::load_image(&path).unwrap_err();
        assert!(matches!(err, MedsegError::Image(_)));
    }

    #[test]
    fn test_png_roundtrip_is_lossless() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.png");
        let image = gradient(13, 7);

        ImageIOService::save_image(&image, &path, OutputFormat::Png, 90).unwrap();
        assert_eq!(ImageIOService::load_image(&path).unwrap(), image);
    }

    #[test]
    fn test_misnamed_file_loads_by_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("actually_png.jpg");
        let image = gradient(4, 4);
        image.save_with_format(&path, image::ImageFormat::Png).unwrap();

        assert_eq!(ImageIOService::load_image(&path).unwrap(), image);
    }

    #[test]
    fn test_jpeg_and_tiff_save() {
        let temp_dir = TempDir::new().unwrap();
        let image = gradient(16, 16);
        for (name, format) in [("a.jpg", OutputFormat::Jpeg), ("a.tiff", OutputFormat::Tiff)] {
            let path = temp_dir.path().join(name);
            ImageIOService::save_image(&image, &path, format, 75).unwrap();
            assert_eq!(ImageIOService::load_image(&path).unwrap().dimensions(), (16, 16));
        }
    }

    #[test]
    fn test_save_overwrites_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("out.png");
        ImageIOService::save_image(&gradient(4, 4), &path, OutputFormat::Png, 90).unwrap();
        ImageIOService::save_image(&gradient(8, 2), &path, OutputFormat::Png, 90).unwrap();
        assert_eq!(ImageIOService::load_image(&path).unwrap().dimensions(), (8, 2));
    }

    #[test]
    fn test_is_supported_format() {
        assert!(ImageIOService::is_supported_format("scan.PNG"));
        assert!(ImageIOService::is_supported_format("a/b/scan.jpeg"));
        assert!(!ImageIOService::is_supported_format("notes.txt"));
        assert!(!ImageIOService::is_supported_format("no_extension"));
    }
}
