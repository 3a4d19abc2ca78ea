//! ONNX Runtime session construction shared by the detector and segmenter
//!
//! Both engines load their weights through [`build_session`], which applies the
//! requested execution provider with availability checking and falls back to
//! CPU when an accelerator is missing.

use crate::backends::{OnnxDetector, OnnxSegmenter};
use crate::config::{ExecutionProvider, PipelineConfig};
use crate::error::{MedsegError, Result};
use crate::inference::{BoxSegmenter, Detector};
use crate::models::ModelInfo;
use crate::registry::ModelFactory;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use std::time::Instant;

/// [`ModelFactory`] building ONNX Runtime engines from the configured weights
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxModelFactory;

impl ModelFactory for OnnxModelFactory {
    fn create_detector(
        &self,
        config: &PipelineConfig,
        device: ExecutionProvider,
    ) -> Result<Box<dyn Detector>> {
        Ok(Box::new(OnnxDetector::load(config, device)?))
    }

    fn create_segmenter(
        &self,
        config: &PipelineConfig,
        device: ExecutionProvider,
    ) -> Result<Box<dyn BoxSegmenter>> {
        Ok(Box::new(OnnxSegmenter::load(config, device)?))
    }
}

/// List ONNX Runtime execution providers with availability status and descriptions
///
/// ```rust,no_run
/// use medseg::backends::list_providers;
///
/// for (name, available, description) in list_providers() {
///     println!("{name}: {} - {description}", if available { "yes" } else { "no" });
/// }
/// ```
#[must_use]
pub fn list_providers() -> Vec<(String, bool, String)> {
    log::debug!("Platform: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    log::debug!("CPU cores: {}", available_cores(1));

    let cuda_available =
        OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
    let coreml_available =
        OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false);

    vec![
        (
            "CPU".to_string(),
            true,
            "Always available, uses CPU for inference".to_string(),
        ),
        (
            "CUDA".to_string(),
            cuda_available,
            "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
        ),
        (
            "CoreML".to_string(),
            coreml_available,
            "Apple Silicon GPU acceleration (macOS only)".to_string(),
        ),
    ]
}

/// Build an ONNX Runtime session from in-memory weights
///
/// # Errors
/// `ModelLoad` if the runtime rejects the builder settings or the weights
pub fn build_session(
    model_data: &[u8],
    info: &ModelInfo,
    device: ExecutionProvider,
    intra_threads: usize,
    inter_threads: usize,
) -> Result<Session> {
    let start = Instant::now();
    let name = info.display_name();
    let load_err = |stage: &str, e: ort::Error| {
        MedsegError::model_load(format!("{name}: failed to {stage}: {e}"))
    };

    let builder = Session::builder()
        .map_err(|e| load_err("create session builder", e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| load_err("set optimization level", e))?;
    let builder = configure_providers(builder, device)
        .map_err(|e| load_err("set execution provider", e))?;

    let (intra_threads, inter_threads) = resolve_threads(intra_threads, inter_threads);
    let session = builder
        .with_intra_threads(intra_threads)
        .map_err(|e| load_err("set intra threads", e))?
        .with_inter_threads(inter_threads)
        .map_err(|e| load_err("set inter threads", e))?
        .commit_from_memory(model_data)
        .map_err(|e| load_err("create session from model data", e))?;

    log::debug!("Session created for {name}");
    log::debug!("  - Requested provider: {device}");
    log::debug!("  - Threading: {intra_threads} intra-op, {inter_threads} inter-op");
    log::debug!(
        "  - Model size: {:.2} MB",
        info.size_bytes as f64 / (1024.0 * 1024.0)
    );
    log::info!(
        "Loaded {name} in {:.0}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(session)
}

fn configure_providers(
    builder: SessionBuilder,
    device: ExecutionProvider,
) -> std::result::Result<SessionBuilder, ort::Error> {
    match device {
        ExecutionProvider::Auto => {
            let mut providers = Vec::new();

            let cuda_provider = CUDAExecutionProvider::default();
            if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                log::info!("CUDA execution provider is available and will be used");
                providers.push(cuda_provider.build());
            } else {
                log::debug!("CUDA execution provider is not available");
            }

            let coreml_provider = CoreMLExecutionProvider::default();
            if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                log::info!("CoreML execution provider is available and will be used");
                providers.push(coreml_provider.with_subgraphs(true).build());
            } else {
                log::debug!("CoreML execution provider is not available");
            }

            if providers.is_empty() {
                log::warn!("No hardware acceleration available, falling back to CPU");
                Ok(builder)
            } else {
                builder.with_execution_providers(providers)
            }
        },
        ExecutionProvider::Cpu => {
            log::info!("Using CPU execution provider");
            Ok(builder)
        },
        ExecutionProvider::Cuda => {
            let cuda_provider = CUDAExecutionProvider::default();
            if OrtExecutionProvider::is_available(&cuda_provider).unwrap_or(false) {
                log::info!("Using CUDA execution provider");
                builder.with_execution_providers([cuda_provider.build()])
            } else {
                log::warn!(
                    "CUDA execution provider requested but not available, falling back to CPU"
                );
                Ok(builder)
            }
        },
        ExecutionProvider::CoreMl => {
            let coreml_provider = CoreMLExecutionProvider::default();
            if OrtExecutionProvider::is_available(&coreml_provider).unwrap_or(false) {
                log::info!("Using CoreML execution provider");
                builder.with_execution_providers([coreml_provider.with_subgraphs(true).build()])
            } else {
                log::warn!(
                    "CoreML execution provider requested but not available, falling back to CPU"
                );
                Ok(builder)
            }
        },
    }
}

fn available_cores(fallback: usize) -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(fallback)
}

/// Resolve `0 = auto` thread counts: all cores within ops, a quarter between them
fn resolve_threads(intra_threads: usize, inter_threads: usize) -> (usize, usize) {
    let intra = if intra_threads > 0 {
        intra_threads
    } else {
        available_cores(8)
    };
    let inter = if inter_threads > 0 {
        inter_threads
    } else {
        (available_cores(8) / 4).max(1)
    };
    (intra, inter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelRole;
    use std::path::PathBuf;

    #[test]
    fn test_resolve_threads_keeps_explicit_values() {
        assert_eq!(resolve_threads(3, 2), (3, 2));
    }

    #[test]
    fn test_resolve_threads_auto_is_positive() {
        let (intra, inter) = resolve_threads(0, 0);
        assert!(intra >= 1);
        assert!(inter >= 1);
        assert!(inter <= intra);
    }

    #[test]
    fn test_cpu_always_listed() {
        let providers = list_providers();
        assert_eq!(providers.len(), 3);
        assert!(providers
            .iter()
            .any(|(name, available, _)| name == "CPU" && *available));
    }

    #[test]
    fn test_garbage_weights_are_model_load_error() {
        let info = ModelInfo {
            role: ModelRole::Detector,
            path: PathBuf::from("garbage.onnx"),
            size_bytes: 4,
        };
        let err = build_session(&[0x08, 0x01, 0xff, 0x00], &info, ExecutionProvider::Cpu, 1, 1)
            .unwrap_err();
        assert!(matches!(err, MedsegError::ModelLoad(_)));
    }
}
