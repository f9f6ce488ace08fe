//! # lumen-inference
//!
//! Collaborator clients used by lumen job handlers.
//!
//! This crate provides:
//! - Ollama vision backend for captions and text extraction
//! - HTTP image embedding client
//! - HTTP image fetcher with size limits and magic-byte validation
//! - Raster image metadata and thumbnails via the `image` crate
//!
//! # Feature Flags
//!
//! - `mock`: deterministic in-process backend for tests in dependent crates

pub mod embedding;
pub mod fetch;
pub mod processor;
pub mod vision;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use embedding::HttpEmbeddingBackend;
pub use fetch::{sniff_image_mime, HttpImageFetcher};
pub use processor::RasterImageProcessor;
pub use vision::OllamaVisionBackend;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockInferenceBackend;
