//! Box-prompted SAM segmenter on ONNX Runtime
//!
//! Runs as the usual encoder/decoder pair. The encoder embeds the whole image
//! once; each box prompt then only costs a decoder pass. Embeddings are cached
//! per image, keyed by a SHA-256 fingerprint of its dimensions and pixels, so
//! all detections of one request share a single encoder run.

use crate::backends::onnx::build_session;
use crate::config::{ExecutionProvider, PipelineConfig};
use crate::error::{MedsegError, Result};
use crate::inference::{BoxSegmenter, SegmenterOutput};
use crate::models::{load_weights, ModelInfo, ModelRole};
use crate::types::BoundingBox;
use crate::utils::ImagePreprocessor;
use image::RgbImage;
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, Ix4};
use ort::session::Session;
use ort::value::Tensor;
use sha2::{Digest, Sha256};
use std::time::Instant;

/// Square encoder input edge
pub const SAM_INPUT_SIZE: u32 = 1024;
/// Low-resolution mask prompt edge expected by the decoder
const MASK_INPUT_SIZE: usize = 256;
/// Decoder logits above this are foreground
const MASK_THRESHOLD: f32 = 0.0;
/// SAM point labels for the top-left and bottom-right box corners
const BOX_CORNER_LABELS: [f32; 2] = [2.0, 3.0];

struct CachedEmbedding {
    fingerprint: [u8; 32],
    embeddings: ArrayD<f32>,
    scale: f32,
}

/// ONNX Runtime SAM encoder/decoder pair
pub struct OnnxSegmenter {
    encoder: Session,
    decoder: Session,
    encoder_info: ModelInfo,
    decoder_info: ModelInfo,
    cached: Option<CachedEmbedding>,
}

impl OnnxSegmenter {
    /// Load the encoder and decoder weights named in `config`
    ///
    /// # Errors
    /// `ModelLoad` when either weights file is missing or invalid
    pub fn load(config: &PipelineConfig, device: ExecutionProvider) -> Result<Self> {
        let weights = &config.segmenter_weights;
        let (encoder_data, encoder_info) =
            load_weights(ModelRole::SegmenterEncoder, &weights.encoder)?;
        let (decoder_data, decoder_info) =
            load_weights(ModelRole::SegmenterDecoder, &weights.decoder)?;

        let encoder = build_session(
            &encoder_data,
            &encoder_info,
            device,
            config.intra_threads,
            config.inter_threads,
        )?;
        let decoder = build_session(
            &decoder_data,
            &decoder_info,
            device,
            config.intra_threads,
            config.inter_threads,
        )?;

        Ok(Self {
            encoder,
            decoder,
            encoder_info,
            decoder_info,
            cached: None,
        })
    }

    /// Embeddings for `image`, running the encoder only on a cache miss
    fn embeddings(&mut self, image: &RgbImage) -> Result<(ArrayD<f32>, f32)> {
        let fingerprint = image_fingerprint(image);
        if let Some(cached) = self.cached.as_ref().filter(|c| c.fingerprint == fingerprint) {
            log::debug!("Reusing cached image embeddings");
            return Ok((cached.embeddings.clone(), cached.scale));
        }

        let start = Instant::now();
        let (input, scale) = ImagePreprocessor::resize_longest_side(image, SAM_INPUT_SIZE)
            .map_err(|e| MedsegError::segmentation(format!("Failed to preprocess image: {e}")))?;
        let input_value = Tensor::from_array(input).map_err(|e| {
            MedsegError::segmentation(format!("Failed to convert encoder input: {e}"))
        })?;

        let outputs = self
            .encoder
            .run(ort::inputs![input_value])
            .map_err(|e| MedsegError::segmentation(format!("Encoder inference failed: {e}")))?;
        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| MedsegError::segmentation("Encoder produced no outputs"))?;
        let embeddings = outputs
            .get(first_key)
            .ok_or_else(|| MedsegError::segmentation("Encoder output not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| {
                MedsegError::segmentation(format!("Failed to extract image embeddings: {e}"))
            })?
            .to_owned();

        log::debug!(
            "{}: embeddings {:?} in {:.2}ms",
            self.encoder_info.display_name(),
            embeddings.shape(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        self.cached = Some(CachedEmbedding {
            fingerprint,
            embeddings: embeddings.clone(),
            scale,
        });
        Ok((embeddings, scale))
    }
}

impl BoxSegmenter for OnnxSegmenter {
    fn segment(&mut self, image: &RgbImage, prompt: &BoundingBox) -> Result<SegmenterOutput> {
        let (embeddings, scale) = self.embeddings(image)?;
        let (height, width) = (image.height(), image.width());

        let start = Instant::now();
        let (coords, labels) = box_prompt(prompt, scale);
        let to_tensor_err = |e: ort::Error| {
            MedsegError::segmentation(format!("Failed to build decoder input: {e}"))
        };

        let mask_input = Array4::<f32>::zeros((1, 1, MASK_INPUT_SIZE, MASK_INPUT_SIZE));
        let has_mask_input = Array1::<f32>::zeros(1);
        let orig_im_size = Array1::from_vec(vec![height as f32, width as f32]);

        let inputs = ort::inputs![
            "image_embeddings" => Tensor::from_array(embeddings).map_err(to_tensor_err)?,
            "point_coords" => Tensor::from_array(coords).map_err(to_tensor_err)?,
            "point_labels" => Tensor::from_array(labels).map_err(to_tensor_err)?,
            "mask_input" => Tensor::from_array(mask_input).map_err(to_tensor_err)?,
            "has_mask_input" => Tensor::from_array(has_mask_input).map_err(to_tensor_err)?,
            "orig_im_size" => Tensor::from_array(orig_im_size).map_err(to_tensor_err)?,
        ];

        let outputs = self.decoder.run(inputs).map_err(|e| {
            MedsegError::segmentation(format!("Decoder rejected prompt {prompt:?}: {e}"))
        })?;

        let masks = match outputs.get("masks") {
            Some(value) => value,
            None => {
                let keys: Vec<_> = outputs.keys().collect();
                let first_key = keys
                    .first()
                    .ok_or_else(|| MedsegError::segmentation("Decoder produced no outputs"))?;
                outputs
                    .get(first_key)
                    .ok_or_else(|| MedsegError::segmentation("Decoder output not found"))?
            },
        };
        let data = masks
            .try_extract_array::<f32>()
            .map_err(|e| MedsegError::segmentation(format!("Failed to extract masks: {e}")))?
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|e| MedsegError::segmentation(format!("Expected 4D mask tensor: {e}")))?;

        log::debug!(
            "{}: mask {:?} in {:.2}ms",
            self.decoder_info.display_name(),
            data.shape(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(SegmenterOutput::Tensor {
            data,
            threshold: MASK_THRESHOLD,
        })
    }

    fn name(&self) -> String {
        format!(
            "{}+{}",
            self.encoder_info.display_name(),
            self.decoder_info.display_name()
        )
    }
}

/// SHA-256 over the image dimensions and raw RGB bytes
#[must_use]
pub fn image_fingerprint(image: &RgbImage) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_le_bytes());
    hasher.update(image.height().to_le_bytes());
    hasher.update(image.as_raw());
    hasher.finalize().into()
}

/// Box corners as decoder point prompts in encoder input space
///
/// Returns `point_coords` of shape `[1, 2, 2]` and `point_labels` of shape `[1, 2]`.
#[must_use]
pub fn box_prompt(prompt: &BoundingBox, scale: f32) -> (Array3<f32>, Array2<f32>) {
    let [x1, y1, x2, y2] = prompt.to_xyxy();
    let coords = Array3::from_shape_fn((1, 2, 2), |(_, corner, axis)| {
        let value = match (corner, axis) {
            (0, 0) => x1,
            (0, _) => y1,
            (_, 0) => x2,
            _ => y2,
        };
        value * scale
    });
    let labels = Array2::from_shape_fn((1, 2), |(_, corner)| {
        BOX_CORNER_LABELS.get(corner).copied().unwrap_or_default()
    });
    (coords, labels)
}
