//! Shared helpers for the inference backends

pub mod preprocessing;

pub use preprocessing::{ImagePreprocessor, LetterboxTransform};
