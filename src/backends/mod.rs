//! Inference engine implementations
//!
//! - ONNX Runtime detector and segmenter (CPU, CUDA, CoreML)
//! - Mock engines for tests and dry runs

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub mod sam;

#[cfg(feature = "onnx")]
pub mod yolo;

pub mod mock;

#[cfg(feature = "onnx")]
pub use self::onnx::{build_session, list_providers, OnnxModelFactory};

#[cfg(feature = "onnx")]
pub use self::sam::OnnxSegmenter;

#[cfg(feature = "onnx")]
pub use self::yolo::OnnxDetector;

pub use self::mock::{MockDetector, MockMaskMode, MockModelFactory, MockSegmenter};
