//! Model weights locations and loading

use crate::error::{MedsegError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default segmenter encoder weights, relative to the working directory
pub const DEFAULT_SEGMENTER_ENCODER: &str = "media/models/sam_encoder.onnx";
/// Default segmenter decoder weights, relative to the working directory
pub const DEFAULT_SEGMENTER_DECODER: &str = "media/models/sam_decoder.onnx";

/// Serialized ONNX models open with the `ir_version` field (tag 1, varint)
const ONNX_LEADING_BYTE: u8 = 0x08;

/// Which of the two models a weights file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Detector,
    SegmenterEncoder,
    SegmenterDecoder,
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detector => write!(f, "detector"),
            Self::SegmenterEncoder => write!(f, "segmenter encoder"),
            Self::SegmenterDecoder => write!(f, "segmenter decoder"),
        }
    }
}

/// The promptable segmenter ships as an image encoder plus a prompt decoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmenterWeights {
    pub encoder: PathBuf,
    pub decoder: PathBuf,
}

impl Default for SegmenterWeights {
    fn default() -> Self {
        Self {
            encoder: PathBuf::from(DEFAULT_SEGMENTER_ENCODER),
            decoder: PathBuf::from(DEFAULT_SEGMENTER_DECODER),
        }
    }
}

impl SegmenterWeights {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(encoder: P, decoder: Q) -> Self {
        Self {
            encoder: encoder.into(),
            decoder: decoder.into(),
        }
    }
}

/// Metadata about a loaded weights file
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub role: ModelRole,
    pub path: PathBuf,
    pub size_bytes: usize,
}

impl ModelInfo {
    #[must_use]
    pub fn display_name(&self) -> String {
        format!(
            "{}:{}",
            self.role,
            self.path.file_name().unwrap_or_default().to_string_lossy()
        )
    }
}

/// Read a weights file into memory, rejecting missing, empty or non-ONNX files
///
/// # Errors
/// `ModelLoad` when the file is absent, not a regular file, unreadable,
/// empty, or does not look like a serialized ONNX model
pub fn load_weights(role: ModelRole, path: &Path) -> Result<(Vec<u8>, ModelInfo)> {
    if !path.exists() {
        return Err(MedsegError::model_load_error(
            &role.to_string(),
            path,
            "file does not exist",
        ));
    }
    if !path.is_file() {
        return Err(MedsegError::model_load_error(
            &role.to_string(),
            path,
            "path is not a regular file",
        ));
    }

    let data = fs::read(path)
        .map_err(|e| MedsegError::model_load_error(&role.to_string(), path, &e.to_string()))?;

    match data.first() {
        None => {
            return Err(MedsegError::model_load_error(
                &role.to_string(),
                path,
                "file is empty",
            ))
        },
        Some(&byte) if byte != ONNX_LEADING_BYTE => {
            return Err(MedsegError::model_load_error(
                &role.to_string(),
                path,
                "file is not a serialized ONNX model",
            ))
        },
        Some(_) => {},
    }

    let info = ModelInfo {
        role,
        path: path.to_path_buf(),
        size_bytes: data.len(),
    };
    log::debug!(
        "Read {} ({:.2} MB)",
        info.display_name(),
        info.size_bytes as f64 / (1024.0 * 1024.0)
    );
    Ok((data, info))
}
