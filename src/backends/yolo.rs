//! YOLO-family ONNX detector
//!
//! Accepts the single-output export layout `[1, 4 + classes, anchors]` (or its
//! transpose) with `cx, cy, w, h` boxes in letterboxed input pixels followed by
//! per-class scores. Decoding, class-wise NMS and the mapping back to source
//! pixels all happen here, so callers receive final detections.

use crate::backends::onnx::build_session;
use crate::config::{ExecutionProvider, PipelineConfig};
use crate::error::{MedsegError, Result};
use crate::inference::{Detector, RawDetection};
use crate::models::{load_weights, ModelInfo, ModelRole};
use crate::utils::ImagePreprocessor;
use image::RgbImage;
use ndarray::{s, Array2, ArrayView2, ArrayViewD, Axis};
use ort::session::Session;
use ort::value::Tensor;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Instant;

/// A decoded, not yet suppressed, box in model input pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub xyxy: [f32; 4],
    pub class_id: usize,
    pub score: f32,
}

/// ONNX Runtime detector for YOLO-family exports
pub struct OnnxDetector {
    session: Session,
    info: ModelInfo,
    config: PipelineConfig,
}

impl OnnxDetector {
    /// Load the detector weights named in `config`
    ///
    /// # Errors
    /// `ModelLoad` for missing or invalid weights
    pub fn load(config: &PipelineConfig, device: ExecutionProvider) -> Result<Self> {
        let (data, info) = load_weights(ModelRole::Detector, &config.detector_weights)?;
        let session = build_session(
            &data,
            &info,
            device,
            config.intra_threads,
            config.inter_threads,
        )?;

        let mut config = config.clone();
        if config.class_names.is_empty() {
            config.class_names = embedded_class_names(&session);
        }
        log::debug!(
            "{}: {} class name(s) available",
            info.display_name(),
            config.class_names.len()
        );

        Ok(Self {
            session,
            info,
            config,
        })
    }

    fn run(&mut self, input: ndarray::Array4<f32>) -> Result<ndarray::ArrayD<f32>> {
        let input_value = Tensor::from_array(input).map_err(|e| {
            MedsegError::detection(format!("Failed to convert input tensor: {e}"))
        })?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| MedsegError::detection(format!("ONNX inference failed: {e}")))?;

        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| MedsegError::detection("No output tensors found"))?;
        let predictions = outputs
            .get(first_key)
            .ok_or_else(|| MedsegError::detection("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| MedsegError::detection(format!("Failed to extract output tensor: {e}")))?
            .to_owned();
        Ok(predictions)
    }
}

impl Detector for OnnxDetector {
    fn detect(
        &mut self,
        image: &RgbImage,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        let start = Instant::now();
        let (input, transform) =
            ImagePreprocessor::letterbox(image, self.config.detector_input_size).map_err(|e| {
                MedsegError::detection(format!("Failed to preprocess image: {e}"))
            })?;

        let predictions = self.run(input)?;
        let rows = prediction_rows(predictions.view())?;
        let candidates = decode_candidates(rows.view(), confidence_threshold);
        let kept = non_max_suppression(
            candidates,
            self.config.iou_threshold,
            self.config.max_detections,
        );

        let detections: Vec<RawDetection> = kept
            .into_iter()
            .map(|candidate| RawDetection {
                xyxy: transform.to_source(candidate.xyxy),
                class_id: candidate.class_id,
                class_name: self.config.class_name(candidate.class_id),
                confidence: candidate.score,
            })
            .collect();

        log::debug!(
            "{}: {} detection(s) in {:.2}ms",
            self.info.display_name(),
            detections.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(detections)
    }

    fn name(&self) -> String {
        self.info.display_name()
    }
}

/// Class names stored in the model's `names` metadata entry, or none
fn embedded_class_names(session: &Session) -> Vec<String> {
    let raw = match session.metadata().and_then(|metadata| metadata.custom("names")) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            log::debug!("Could not read model metadata: {e}");
            return Vec::new();
        }
    };
    let names = parse_class_names(&raw);
    if names.is_empty() {
        log::warn!("Ignoring unparseable class names in model metadata: {raw}");
    }
    names
}

/// Parse a class-name table into a list indexed by class id
///
/// Accepts a JSON list, a JSON object keyed by id, and the Python dict
/// literal written by Ultralytics exports (`{0: 'glioma', 1: 'meningioma'}`).
/// Ids missing from a keyed table become `class_<id>`. Unparseable input
/// yields an empty list.
#[must_use]
pub fn parse_class_names(raw: &str) -> Vec<String> {
    if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
        return list;
    }
    let keyed = serde_json::from_str::<BTreeMap<usize, String>>(raw)
        .ok()
        .or_else(|| parse_python_dict(raw));
    let Some(keyed) = keyed else {
        return Vec::new();
    };
    let Some(&max_id) = keyed.keys().next_back() else {
        return Vec::new();
    };
    (0..=max_id)
        .map(|id| keyed.get(&id).cloned().unwrap_or_else(|| format!("class_{id}")))
        .collect()
}

fn parse_python_dict(raw: &str) -> Option<BTreeMap<usize, String>> {
    let mut rest = raw.trim().strip_prefix('{')?.strip_suffix('}')?.trim();
    let mut names = BTreeMap::new();
    while !rest.is_empty() {
        let (key, value) = rest.split_once(':')?;
        let id: usize = key.trim().parse().ok()?;
        let value = value.trim_start();
        let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"')?;
        let value = value.get(1..)?;
        let end = value.find(quote)?;
        names.insert(id, value.get(..end)?.to_string());
        let tail = value.get(end + 1..)?.trim_start();
        rest = tail.strip_prefix(',').unwrap_or(tail).trim_start();
    }
    Some(names)
}

/// Normalize the raw output to one row per anchor: `[anchors, 4 + classes]`
///
/// # Errors
/// `Detection` for outputs that are not 3-D with a batch of one and at least
/// one class column
pub fn prediction_rows(output: ArrayViewD<'_, f32>) -> Result<Array2<f32>> {
    let shape = output.shape().to_vec();
    let &[batch, dim_a, dim_b] = shape.as_slice() else {
        return Err(MedsegError::detection(format!(
            "Expected 3D detector output, got shape {shape:?}"
        )));
    };
    if batch != 1 {
        return Err(MedsegError::detection(format!(
            "Expected batch size 1 in detector output, got {batch}"
        )));
    }

    let plane = output
        .index_axis(Axis(0), 0)
        .into_dimensionality::<ndarray::Ix2>()
        .map_err(|e| MedsegError::detection(format!("Failed to reshape detector output: {e}")))?;

    // Exports put the short feature axis first; anchors always outnumber features
    let rows = if dim_a <= dim_b {
        plane.reversed_axes().to_owned()
    } else {
        plane.to_owned()
    };

    if rows.ncols() < 5 {
        return Err(MedsegError::detection(format!(
            "Detector output has no class scores (shape {shape:?})"
        )));
    }
    Ok(rows)
}

/// Best class per anchor, thresholded, with boxes converted to corners
#[must_use]
pub fn decode_candidates(rows: ArrayView2<'_, f32>, confidence_threshold: f32) -> Vec<Candidate> {
    rows.outer_iter()
        .filter_map(|row| {
            let scores = row.slice(s![4..]);
            let (class_id, &score) = scores
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))?;
            if score < confidence_threshold {
                return None;
            }
            let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
            Some(Candidate {
                xyxy: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
                class_id,
                score,
            })
        })
        .collect()
}

/// Class-wise greedy NMS, highest score first, capped at `max_detections`
#[must_use]
pub fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.xyxy, &candidate.xyxy) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Intersection over union of two corner boxes
#[must_use]
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = ix * iy;
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}
