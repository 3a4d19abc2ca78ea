//! Mock engines for testing and debugging
//!
//! These stand in for the ONNX models so the pipeline can be exercised without
//! weights files. The detector replays a scripted list of detections; the
//! segmenter fills the prompted box, either as a materialized mask at source
//! resolution or as a score tensor at a fixed, usually different, resolution.

use crate::{
    config::{ExecutionProvider, PipelineConfig},
    error::{MedsegError, Result},
    inference::{BoxSegmenter, Detector, RawDetection, SegmenterOutput},
    mask::BinaryMask,
    registry::ModelFactory,
    types::BoundingBox,
};
use image::RgbImage;
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Detector replaying a fixed list of detections
#[derive(Debug, Clone, Default)]
pub struct MockDetector {
    detections: Vec<RawDetection>,
    fail: bool,
    thresholds_seen: Arc<Mutex<Vec<f32>>>,
}

impl MockDetector {
    #[must_use]
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            ..Self::default()
        }
    }

    /// Detector whose every call fails
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Confidence thresholds passed to `detect`, in call order
    #[must_use]
    pub fn thresholds_seen(&self) -> Vec<f32> {
        self.thresholds_seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

impl Detector for MockDetector {
    fn detect(
        &mut self,
        _image: &RgbImage,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>> {
        if let Ok(mut seen) = self.thresholds_seen.lock() {
            seen.push(confidence_threshold);
        }
        if self.fail {
            return Err(MedsegError::detection("mock detector failure"));
        }
        Ok(self
            .detections
            .iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .cloned()
            .collect())
    }

    fn name(&self) -> String {
        "mock-detector".to_string()
    }
}

/// How the mock segmenter shapes its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMaskMode {
    /// Binary mask at source resolution covering the prompt box
    FillBox,
    /// Score tensor of the given size covering the scaled prompt box
    FillBoxTensor { width: u32, height: u32 },
    /// All-background mask at source resolution
    Empty,
}

/// Segmenter that fills the prompted box
#[derive(Debug, Clone)]
pub struct MockSegmenter {
    mode: MockMaskMode,
    fail_on_call: Option<usize>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<BoundingBox>>>,
}

impl MockSegmenter {
    #[must_use]
    pub fn new(mode: MockMaskMode) -> Self {
        Self {
            mode,
            fail_on_call: None,
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the call with this zero-based index
    #[must_use]
    pub fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    /// Prompts received so far, in call order
    #[must_use]
    pub fn prompts(&self) -> Vec<BoundingBox> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    fn clamped_box(prompt: &BoundingBox, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let clamp = |v: i32, max: u32| v.clamp(0, max as i32) as u32;
        (
            clamp(prompt.x1, width),
            clamp(prompt.y1, height),
            clamp(prompt.x2, width),
            clamp(prompt.y2, height),
        )
    }
}

impl BoxSegmenter for MockSegmenter {
    fn segment(&mut self, image: &RgbImage, prompt: &BoundingBox) -> Result<SegmenterOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(*prompt);
        }
        if self.fail_on_call == Some(call) {
            return Err(MedsegError::segmentation(format!(
                "mock segmenter rejected prompt {prompt:?}"
            )));
        }

        let (img_w, img_h) = image.dimensions();
        match self.mode {
            MockMaskMode::Empty => {
                Ok(SegmenterOutput::Materialized(BinaryMask::zeros(img_w, img_h)))
            }
            MockMaskMode::FillBox => {
                let (x1, y1, x2, y2) = Self::clamped_box(prompt, img_w, img_h);
                let mut mask = BinaryMask::zeros(img_w, img_h);
                mask.fill_rect(x1, y1, x2, y2);
                Ok(SegmenterOutput::Materialized(mask))
            },
            MockMaskMode::FillBoxTensor { width, height } => {
                let (x1, y1, x2, y2) = Self::clamped_box(prompt, img_w, img_h);
                let sx = width as f32 / img_w.max(1) as f32;
                let sy = height as f32 / img_h.max(1) as f32;
                let (mx1, mx2) = ((x1 as f32 * sx) as usize, (x2 as f32 * sx) as usize);
                let (my1, my2) = ((y1 as f32 * sy) as usize, (y2 as f32 * sy) as usize);

                let data = Array4::from_shape_fn(
                    (1, 1, height as usize, width as usize),
                    |(_, _, y, x)| {
                        if (mx1..mx2).contains(&x) && (my1..my2).contains(&y) {
                            8.0
                        } else {
                            -8.0
                        }
                    },
                );
                Ok(SegmenterOutput::Tensor {
                    data,
                    threshold: 0.0,
                })
            },
        }
    }

    fn name(&self) -> String {
        format!("mock-segmenter({:?})", self.mode)
    }
}

/// Load counters shared between a [`MockModelFactory`] and the test holding it
#[derive(Debug, Clone, Default)]
pub struct MockLoadCounters {
    detector_loads: Arc<AtomicUsize>,
    segmenter_loads: Arc<AtomicUsize>,
    devices: Arc<Mutex<Vec<ExecutionProvider>>>,
}

impl MockLoadCounters {
    #[must_use]
    pub fn detector_loads(&self) -> usize {
        self.detector_loads.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn segmenter_loads(&self) -> usize {
        self.segmenter_loads.load(Ordering::SeqCst)
    }

    /// Devices passed to every create call, in call order
    #[must_use]
    pub fn devices(&self) -> Vec<ExecutionProvider> {
        self.devices
            .lock()
            .map(|devices| devices.clone())
            .unwrap_or_default()
    }

    fn record(&self, counter: &AtomicUsize, device: ExecutionProvider) {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut devices) = self.devices.lock() {
            devices.push(device);
        }
    }
}

/// Factory producing mock engines
#[derive(Debug, Clone)]
pub struct MockModelFactory {
    detector: MockDetector,
    segmenter: MockSegmenter,
    fail_detector_load: bool,
    load_delay: Duration,
    counters: MockLoadCounters,
}

impl MockModelFactory {
    /// Factory with no detections and a box-filling segmenter
    #[must_use]
    pub fn new() -> Self {
        Self {
            detector: MockDetector::default(),
            segmenter: MockSegmenter::new(MockMaskMode::FillBox),
            fail_detector_load: false,
            load_delay: Duration::ZERO,
            counters: MockLoadCounters::default(),
        }
    }

    #[must_use]
    pub fn with_detector(mut self, detector: MockDetector) -> Self {
        self.detector = detector;
        self
    }

    #[must_use]
    pub fn with_segmenter(mut self, segmenter: MockSegmenter) -> Self {
        self.segmenter = segmenter;
        self
    }

    /// Simulate missing detector weights
    #[must_use]
    pub fn failing_detector_load(mut self) -> Self {
        self.fail_detector_load = true;
        self
    }

    /// Sleep this long inside each create call
    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    #[must_use]
    pub fn counters(&self) -> MockLoadCounters {
        self.counters.clone()
    }
}

impl Default for MockModelFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelFactory for MockModelFactory {
    fn create_detector(
        &self,
        config: &PipelineConfig,
        device: ExecutionProvider,
    ) -> Result<Box<dyn Detector>> {
        std::thread::sleep(self.load_delay);
        self.counters.record(&self.counters.detector_loads, device);
        if self.fail_detector_load {
            return Err(MedsegError::model_load_error(
                "detector",
                &config.detector_weights,
                "file does not exist",
            ));
        }
        Ok(Box::new(self.detector.clone()))
    }

    fn create_segmenter(
        &self,
        _config: &PipelineConfig,
        device: ExecutionProvider,
    ) -> Result<Box<dyn BoxSegmenter>> {
        std::thread::sleep(self.load_delay);
        self.counters.record(&self.counters.segmenter_loads, device);
        Ok(Box::new(self.segmenter.clone()))
    }
}

/// Convenience constructor for scripted detections
#[must_use]
pub fn raw_detection(
    xyxy: [f32; 4],
    class_id: usize,
    class_name: &str,
    confidence: f32,
) -> RawDetection {
    RawDetection {
        xyxy,
        class_id,
        class_name: class_name.to_string(),
        confidence,
    }
}
