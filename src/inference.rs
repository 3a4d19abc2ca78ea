//! Inference engine abstractions
//!
//! The pipeline only talks to these two traits. The ONNX Runtime
//! implementations live in `backends::onnx`; `backends::mock` provides
//! deterministic stand-ins for tests.

use crate::{
    error::{MedsegError, Result},
    mask::BinaryMask,
    types::BoundingBox,
};
use image::RgbImage;
use ndarray::{s, Array4};

/// Detector output before coordinate truncation
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// `[x1, y1, x2, y2]` in source image pixels
    pub xyxy: [f32; 4],
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
}

/// Bounding-box object detector
pub trait Detector: Send {
    /// Run single-image inference
    ///
    /// Implementations apply `confidence_threshold` themselves; callers never
    /// re-filter. Output order is the detector's native order.
    ///
    /// # Errors
    /// - Preprocessing or tensor conversion failures
    /// - Runtime inference failures
    /// - Output tensors of an unexpected shape
    fn detect(&mut self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<RawDetection>>;

    /// Name for logging
    fn name(&self) -> String;
}

/// Mask returned by a segmenter, before extraction
///
/// Segmenters differ in what they hand back: full models return a score
/// tensor, simpler ones an already-binary mask. [`SegmenterOutput::into_mask`]
/// is the single conversion point for both.
#[derive(Debug, Clone)]
pub enum SegmenterOutput {
    /// `[batch, masks, height, width]` scores; `(0, 0)` is the prompted mask and
    /// pixels strictly above `threshold` are foreground
    Tensor { data: Array4<f32>, threshold: f32 },
    /// Mask already materialized as binary values
    Materialized(BinaryMask),
}

impl SegmenterOutput {
    /// Extract the one mask for the prompt
    ///
    /// # Errors
    /// A tensor with no batch entries or no mask channels
    pub fn into_mask(self) -> Result<BinaryMask> {
        match self {
            Self::Materialized(mask) => Ok(mask),
            Self::Tensor { data, threshold } => {
                let (batch, masks, height, width) = data.dim();
                if batch == 0 || masks == 0 {
                    return Err(MedsegError::segmentation(format!(
                        "Segmenter returned no masks (tensor shape {:?})",
                        data.shape()
                    )));
                }
                if masks > 1 {
                    tracing::debug!(masks, "segmenter returned several masks, using the first");
                }
                let plane = data.slice(s![0, 0, .., ..]);
                let values = plane.iter().map(|&v| u8::from(v > threshold)).collect();
                BinaryMask::from_vec(width as u32, height as u32, values)
            },
        }
    }
}

/// Promptable segmenter conditioned on a single box
pub trait BoxSegmenter: Send {
    /// Segment the object inside `prompt`
    ///
    /// # Errors
    /// - Malformed prompts rejected by the model
    /// - Runtime inference failures
    fn segment(&mut self, image: &RgbImage, prompt: &BoundingBox) -> Result<SegmenterOutput>;

    /// Name for logging
    fn name(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_extraction_uses_first_mask() {
        let mut data = Array4::<f32>::from_elem((1, 2, 2, 3), -1.0);
        data[[0, 0, 0, 0]] = 4.0;
        data[[0, 0, 1, 2]] = 0.5;
        data[[0, 1, 1, 1]] = 9.0;

        let mask = SegmenterOutput::Tensor {
            data,
            threshold: 0.0,
        }
        .into_mask()
        .unwrap();

        assert_eq!(mask.dimensions(), (3, 2));
        assert_eq!(mask.as_raw(), &[1, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_tensor_threshold_is_strict() {
        let data = Array4::<f32>::from_elem((1, 1, 1, 2), 0.5);
        let mask = SegmenterOutput::Tensor {
            data,
            threshold: 0.5,
        }
        .into_mask()
        .unwrap();
        assert!(mask.is_all_zero());
    }

    #[test]
    fn test_materialized_passthrough() {
        let mut expected = BinaryMask::zeros(4, 4);
        expected.fill_rect(1, 1, 3, 3);
        let mask = SegmenterOutput::Materialized(expected.clone())
            .into_mask()
            .unwrap();
        assert_eq!(mask, expected);
    }

    #[test]
    fn test_empty_tensor_is_segmentation_error() {
        let data = Array4::<f32>::zeros((1, 0, 4, 4));
        let err = SegmenterOutput::Tensor {
            data,
            threshold: 0.0,
        }
        .into_mask()
        .unwrap_err();
        assert!(matches!(err, MedsegError::Segmentation(_)));
    }
}
