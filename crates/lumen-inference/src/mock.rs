//! Mock inference backend for deterministic testing.
//!
//! Implements the caption, OCR and embedding ports with canned responses
//! and embeddings derived from the input bytes, so the same image always
//! maps to the same vector.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lumen_inference::mock::MockInferenceBackend;
//!
//! let backend = MockInferenceBackend::new()
//!     .with_caption("A cat on a sofa")
//!     .with_ocr_text("WELCOME");
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use lumen_core::{
    defaults, CaptionBackend, Error, ImageEmbeddingBackend, OcrBackend, Result,
};

/// Mock inference backend for testing.
#[derive(Clone)]
pub struct MockInferenceBackend {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    dimension: usize,
    caption: String,
    ocr_text: String,
    failure: Option<String>,
    latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub operation: &'static str,
    pub input_len: usize,
    pub context: Option<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: defaults::EMBEDDING_DIMENSION,
            caption: "Mock caption".to_string(),
            ocr_text: String::new(),
            failure: None,
            latency_ms: 0,
        }
    }
}

impl Default for MockInferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInferenceBackend {
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).caption = caption.into();
        self
    }

    pub fn with_ocr_text(mut self, text: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).ocr_text = text.into();
        self
    }

    /// Make every call fail with an inference error carrying `message`.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).failure = Some(message.into());
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.log().clone()
    }

    /// Number of calls for one operation (`caption`, `ocr` or `embed`).
    pub fn call_count(&self, operation: &str) -> usize {
        self.log().iter().filter(|c| c.operation == operation).count()
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<MockCall>> {
        self.call_log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn record(
        &self,
        operation: &'static str,
        input: &[u8],
        context: Option<&str>,
    ) -> Result<()> {
        self.log().push(MockCall {
            operation,
            input_len: input.len(),
            context: context.map(String::from),
        });
        if self.config.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.latency_ms)).await;
        }
        match &self.config.failure {
            Some(message) => Err(Error::Inference(message.clone())),
            None => Ok(()),
        }
    }
}

/// Deterministic unit vector derived from `data`.
pub fn embedding_for(data: &[u8], dimension: usize) -> Vec<f32> {
    // FNV-1a seed, then an LCG stream.
    let mut state = data.iter().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
        (h ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
    });
    let mut vec: Vec<f32> = (0..dimension)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) % 1000) as f32 / 1000.0 - 0.5
        })
        .collect();

    let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        vec.iter_mut().for_each(|x| *x /= magnitude);
    }
    vec
}

#[async_trait]
impl CaptionBackend for MockInferenceBackend {
    async fn generate_caption(
        &self,
        image_data: &[u8],
        _mime_type: &str,
        context: Option<&str>,
    ) -> Result<String> {
        self.record("caption", image_data, context).await?;
        Ok(self.config.caption.clone())
    }

    fn model_name(&self) -> &str {
        "mock-vision"
    }
}

#[async_trait]
impl OcrBackend for MockInferenceBackend {
    async fn extract_text(&self, image_data: &[u8], _mime_type: &str) -> Result<String> {
        self.record("ocr", image_data, None).await?;
        Ok(self.config.ocr_text.clone())
    }
}

#[async_trait]
impl ImageEmbeddingBackend for MockInferenceBackend {
    async fn generate_embedding(&self, image_data: &[u8], _mime_type: &str) -> Result<Vec<f32>> {
        self.record("embed", image_data, None).await?;
        Ok(embedding_for(image_data, self.config.dimension))
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_for_is_deterministic_unit_vector() {
        let a = embedding_for(b"image-a", 64);
        assert_eq!(a, embedding_for(b"image-a", 64));
        assert_ne!(a, embedding_for(b"image-b", 64));
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_mock_caption_records_context() {
        let backend = MockInferenceBackend::new().with_caption("A lighthouse");
        let caption = backend
            .generate_caption(b"img", "image/png", Some("EXIT"))
            .await
            .unwrap();
        assert_eq!(caption, "A lighthouse");
        assert_eq!(backend.call_count("caption"), 1);
        assert_eq!(backend.get_calls()[0].context.as_deref(), Some("EXIT"));
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let backend = MockInferenceBackend::new().with_failure("model offline");
        let err = backend.extract_text(b"img", "image/png").await.unwrap_err();
        assert_eq!(err.to_string(), "Inference error: model offline");
        assert_eq!(backend.call_count("ocr"), 1);
    }

    #[tokio::test]
    async fn test_mock_embedding_dimension() {
        let backend = MockInferenceBackend::new();
        let v = backend.generate_embedding(b"img", "image/png").await.unwrap();
        assert_eq!(v.len(), defaults::EMBEDDING_DIMENSION);
        assert_eq!(backend.dimension(), defaults::EMBEDDING_DIMENSION);
    }
}
