//! Process-lifetime model registry
//!
//! Loading detector and segmenter weights is expensive, so both engines are
//! built once and shared across requests. The registry is an explicit context
//! object: the host constructs it at startup and hands `&ModelRegistry` to every
//! request. First-use construction runs under a mutex, so concurrent first
//! requests build the models exactly once.
//!
//! The device passed to [`ModelRegistry::get_models`] is honoured only by the
//! call that actually loads the models. Later calls with another device get the
//! already-loaded engines; the mismatch is logged and otherwise ignored.

use crate::{
    config::{ExecutionProvider, PipelineConfig},
    error::{MedsegError, Result},
    inference::{BoxSegmenter, Detector},
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

/// Shared handle to the loaded detector
pub type DetectorHandle = Arc<Mutex<Box<dyn Detector>>>;
/// Shared handle to the loaded segmenter
pub type SegmenterHandle = Arc<Mutex<Box<dyn BoxSegmenter>>>;

/// Factory for the two inference engines
pub trait ModelFactory: Send + Sync {
    /// Build the detector bound to `device`
    ///
    /// # Errors
    /// `ModelLoad` when weights are missing, corrupt or rejected by the runtime
    fn create_detector(
        &self,
        config: &PipelineConfig,
        device: ExecutionProvider,
    ) -> Result<Box<dyn Detector>>;

    /// Build the box-conditioned segmenter bound to `device`
    ///
    /// # Errors
    /// `ModelLoad` when weights are missing, corrupt or rejected by the runtime
    fn create_segmenter(
        &self,
        config: &PipelineConfig,
        device: ExecutionProvider,
    ) -> Result<Box<dyn BoxSegmenter>>;
}

struct LoadedModels {
    device: ExecutionProvider,
    detector: DetectorHandle,
    segmenter: SegmenterHandle,
}

/// Lazily loaded, process-scoped detector and segmenter
pub struct ModelRegistry {
    config: PipelineConfig,
    factory: Box<dyn ModelFactory>,
    models: Mutex<Option<LoadedModels>>,
}

impl ModelRegistry {
    /// Registry backed by ONNX Runtime sessions
    #[cfg(feature = "onnx")]
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self::with_factory(config, Box::new(crate::backends::OnnxModelFactory))
    }

    /// Registry backed by a custom factory
    #[must_use]
    pub fn with_factory(config: PipelineConfig, factory: Box<dyn ModelFactory>) -> Self {
        Self {
            config,
            factory,
            models: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Return the detector and segmenter, loading them on first use
    ///
    /// # Errors
    /// - `ModelLoad` if either model fails to load; nothing is cached and the
    ///   error is returned as-is
    /// - `Internal` if a previous loader panicked while holding the lock
    pub fn get_models(
        &self,
        device: ExecutionProvider,
    ) -> Result<(DetectorHandle, SegmenterHandle)> {
        let mut slot = self.lock_slot()?;

        if let Some(loaded) = slot.as_ref() {
            if loaded.device != device {
                warn!(
                    requested = %device,
                    loaded = %loaded.device,
                    "models already loaded on another device; reusing them"
                );
            }
            return Ok((Arc::clone(&loaded.detector), Arc::clone(&loaded.segmenter)));
        }

        info!(%device, "loading detector and segmenter");
        let detector = self.factory.create_detector(&self.config, device)?;
        let segmenter = self.factory.create_segmenter(&self.config, device)?;
        info!(
            detector = %detector.name(),
            segmenter = %segmenter.name(),
            "models loaded"
        );

        let loaded = LoadedModels {
            device,
            detector: Arc::new(Mutex::new(detector)),
            segmenter: Arc::new(Mutex::new(segmenter)),
        };
        let handles = (Arc::clone(&loaded.detector), Arc::clone(&loaded.segmenter));
        *slot = Some(loaded);
        Ok(handles)
    }

    /// Whether the models have been loaded
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.models.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Device the loaded models are bound to
    #[must_use]
    pub fn loaded_device(&self) -> Option<ExecutionProvider> {
        self.models
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|loaded| loaded.device))
    }

    fn lock_slot(&self) -> Result<MutexGuard<'_, Option<LoadedModels>>> {
        self.models
            .lock()
            .map_err(|_| MedsegError::internal("model registry lock poisoned"))
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("config", &self.config)
            .field("loaded_device", &self.loaded_device())
            .finish_non_exhaustive()
    }
}
