//! Image-to-tensor preprocessing shared by the ONNX detector and segmenter

use crate::error::{MedsegError, Result};
use image::{imageops::FilterType, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;

/// Grey used by YOLO-family letterboxing
pub const LETTERBOX_PAD: [u8; 3] = [114, 114, 114];
/// Per-channel pixel mean used by SAM-family encoders (0-255 scale)
pub const SAM_PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
/// Per-channel pixel std used by SAM-family encoders (0-255 scale)
pub const SAM_PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];

/// Maps model-space coordinates back to source pixels after letterboxing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl LetterboxTransform {
    /// Undo padding and scale, then clamp to the source image
    #[must_use]
    pub fn to_source(&self, xyxy: [f32; 4]) -> [f32; 4] {
        let [x1, y1, x2, y2] = xyxy;
        let w = self.source_width as f32;
        let h = self.source_height as f32;
        let unmap_x = |v: f32| ((v - self.pad_x) / self.scale).clamp(0.0, w);
        let unmap_y = |v: f32| ((v - self.pad_y) / self.scale).clamp(0.0, h);
        [unmap_x(x1), unmap_y(y1), unmap_x(x2), unmap_y(y2)]
    }
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Aspect-preserving resize onto a centered `size x size` canvas, scaled to [0, 1]
    ///
    /// # Errors
    /// Zero-sized source image or target size
    pub fn letterbox(image: &RgbImage, size: u32) -> Result<(Array4<f32>, LetterboxTransform)> {
        let (width, height) = image.dimensions();
        Self::check_dimensions(width, height, size)?;

        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);
        let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);

        let offset_x = (size - new_width) / 2;
        let offset_y = (size - new_height) / 2;
        let mut canvas = ImageBuffer::from_pixel(size, size, Rgb(LETTERBOX_PAD));
        image::imageops::replace(&mut canvas, &resized, i64::from(offset_x), i64::from(offset_y));

        let tensor = Self::canvas_to_tensor(&canvas, |_, value| value / 255.0);

        Ok((
            tensor,
            LetterboxTransform {
                scale,
                pad_x: offset_x as f32,
                pad_y: offset_y as f32,
                source_width: width,
                source_height: height,
            },
        ))
    }

    /// Resize so the longest side equals `size`, normalize with the SAM mean/std
    /// and zero-pad bottom-right to `size x size`
    ///
    /// Returns the tensor and the resize scale (model pixels per source pixel).
    ///
    /// # Errors
    /// Zero-sized source image or target size
    pub fn resize_longest_side(image: &RgbImage, size: u32) -> Result<(Array4<f32>, f32)> {
        let (width, height) = image.dimensions();
        Self::check_dimensions(width, height, size)?;

        let scale = size as f32 / width.max(height) as f32;
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);
        let resized = image::imageops::resize(image, new_width, new_height, FilterType::Triangle);

        let side = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for (channel, &value) in pixel.0.iter().enumerate() {
                if let Some(slot) = tensor.get_mut([0, channel, y as usize, x as usize]) {
                    *slot = (f32::from(value) - SAM_PIXEL_MEAN[channel % 3])
                        / SAM_PIXEL_STD[channel % 3];
                }
            }
        }

        Ok((tensor, scale))
    }

    fn check_dimensions(width: u32, height: u32, size: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(MedsegError::invalid_config(format!(
                "Cannot preprocess empty image ({width}x{height})"
            )));
        }
        if size == 0 {
            return Err(MedsegError::invalid_config("Model input size must be positive"));
        }
        Ok(())
    }

    fn canvas_to_tensor<F: Fn(usize, f32) -> f32>(canvas: &RgbImage, normalize: F) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in canvas.enumerate_pixels() {
            for (channel, &value) in pixel.0.iter().enumerate() {
                if let Some(slot) = tensor.get_mut([0, channel, y as usize, x as usize]) {
                    *slot = normalize(channel, f32::from(value));
                }
            }
        }
        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_wide_image() {
        let image = RgbImage::from_pixel(200, 100, Rgb([255, 0, 0]));
        let (tensor, transform) = ImagePreprocessor::letterbox(&image, 64).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert!((transform.scale - 0.32).abs() < 1e-6);
        assert_eq!(transform.pad_x, 0.0);
        assert_eq!(transform.pad_y, 16.0);

        // Padding rows keep the letterbox grey, content rows carry the image
        assert!((tensor[[0, 0, 0, 10]] - 114.0 / 255.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 32, 10]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 32, 10]].abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_inverse_mapping() {
        let image = RgbImage::new(200, 100);
        let (_, transform) = ImagePreprocessor::letterbox(&image, 64).unwrap();

        let source = transform.to_source([16.0, 24.0, 32.0, 40.0]);
        assert!((source[0] - 50.0).abs() < 1e-3);
        assert!((source[1] - 25.0).abs() < 1e-3);
        assert!((source[2] - 100.0).abs() < 1e-3);
        assert!((source[3] - 75.0).abs() < 1e-3);

        // Coordinates in the padding clamp to the image
        let clamped = transform.to_source([-10.0, 0.0, 80.0, 64.0]);
        assert_eq!(clamped, [0.0, 0.0, 200.0, 100.0]);
    }

    #[test]
    fn test_resize_longest_side_pads_bottom_right() {
        let image = RgbImage::from_pixel(50, 100, Rgb([124, 116, 104]));
        let (tensor, scale) = ImagePreprocessor::resize_longest_side(&image, 32).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
        assert!((scale - 0.32).abs() < 1e-6);
        // Content area is close to zero after mean subtraction
        assert!(tensor[[0, 0, 5, 5]].abs() < 0.05);
        // Right half is zero padding
        assert_eq!(tensor[[0, 0, 5, 30]], 0.0);
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let image = RgbImage::new(0, 10);
        assert!(ImagePreprocessor::letterbox(&image, 64).is_err());
        assert!(ImagePreprocessor::resize_longest_side(&image, 64).is_err());
    }
}
