//! Core types shared by the pipeline stages

use serde::{Deserialize, Serialize};

/// Axis-aligned box in integer pixel coordinates, `(x1, y1)` top-left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    #[must_use]
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Convert detector output coordinates by truncation toward zero
    #[must_use]
    pub fn from_xyxy_truncated(xyxy: [f32; 4]) -> Self {
        let [x1, y1, x2, y2] = xyxy;
        Self {
            x1: x1 as i32,
            y1: y1 as i32,
            x2: x2 as i32,
            y2: y2 as i32,
        }
    }

    #[must_use]
    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }

    #[must_use]
    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Corners as `[x1, y1, x2, y2]` floats, the form segmenter prompts take
    #[must_use]
    pub fn to_xyxy(&self) -> [f32; 4] {
        [
            self.x1 as f32,
            self.y1 as f32,
            self.x2 as f32,
            self.y2 as f32,
        ]
    }
}

/// One labeled box reported by the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub class_name: String,
    /// Detector confidence in [0, 1]
    pub confidence: f32,
}

impl Detection {
    /// Finding line for the textual summary, e.g. `glioma (87.5%)`
    #[must_use]
    pub fn summary_entry(&self) -> String {
        format!("{} ({:.1}%)", self.class_name, self.confidence * 100.0)
    }

    /// Text drawn next to the box, e.g. `glioma 87.5%`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {:.1}%", self.class_name, self.confidence * 100.0)
    }
}

/// Summary entries for a detection sequence, order preserved
#[must_use]
pub fn summarize(detections: &[Detection]) -> Vec<String> {
    detections.iter().map(Detection::summary_entry).collect()
}

/// What the caller gets back from one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// File name (not path) of the detection image inside the output directory
    pub detection_filename: String,
    /// File name (not path) of the segmentation overlay inside the output directory
    pub segmentation_filename: String,
    /// One entry per detection, detector order
    pub summaries: Vec<String>,
}

/// Per-stage wall clock timings of one request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub image_decode_ms: u64,
    pub detection_ms: u64,
    pub segmentation_ms: u64,
    pub rendering_ms: u64,
    pub assembly_ms: u64,
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Stage percentages of the total, in stage order
    #[must_use]
    pub fn breakdown_percentages(&self) -> [(&'static str, f64); 5] {
        let total = self.total_ms.max(1) as f64;
        [
            ("decode", self.image_decode_ms as f64 / total * 100.0),
            ("detection", self.detection_ms as f64 / total * 100.0),
            ("segmentation", self.segmentation_ms as f64 / total * 100.0),
            ("rendering", self.rendering_ms as f64 / total * 100.0),
            ("assembly", self.assembly_ms as f64 / total * 100.0),
        ]
    }

    /// One-line human-readable breakdown for logs
    #[must_use]
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .breakdown_percentages()
            .iter()
            .map(|(stage, pct)| format!("{stage} {pct:.1}%"))
            .collect();
        format!("{}ms total ({})", self.total_ms, parts.join(", "))
    }
}
