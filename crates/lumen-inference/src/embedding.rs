//! HTTP client for an image embedding service.
//!
//! The service accepts `POST {base}/embed` with a base64 image and returns
//! `{"embedding": [f32; N]}`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use lumen_core::{defaults, Error, ImageEmbeddingBackend, Result};

/// Image embedding backend speaking JSON over HTTP.
pub struct HttpEmbeddingBackend {
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpEmbeddingBackend {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dimension: defaults::EMBEDDING_DIMENSION,
            client: reqwest::Client::new(),
            timeout_secs: defaults::EMBED_TIMEOUT_SECS,
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Create from `EMBEDDING_URL` and `EMBEDDING_MODEL`.
    pub fn from_env() -> Self {
        let base_url = std::env::var("EMBEDDING_URL")
            .unwrap_or_else(|_| defaults::EMBEDDING_URL.to_string());
        let model =
            std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| defaults::EMBED_MODEL.to_string());
        Self::new(base_url, model)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'a str,
    image: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl ImageEmbeddingBackend for HttpEmbeddingBackend {
    #[instrument(skip(self, image_data), fields(subsystem = "inference", component = "embedding", op = "embed"))]
    async fn generate_embedding(&self, image_data: &[u8], mime_type: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let request = EmbedRequest {
            model: &self.model,
            image: base64::engine::general_purpose::STANDARD.encode(image_data),
            mime_type,
        };

        let url = format!("{}/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Embedding API returned {}: {}",
                status, body
            )));
        }

        let result: EmbedResponse = response.json().await.map_err(|e| {
            Error::Inference(format!("Failed to parse embedding response: {}", e))
        })?;

        if result.embedding.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: result.embedding.len(),
            });
        }
        if result.embedding.iter().any(|x| !x.is_finite()) {
            return Err(Error::Inference(
                "Embedding contains non-finite values".to_string(),
            ));
        }

        debug!(
            subsystem = "inference",
            component = "embedding",
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "Image embedded"
        );
        Ok(result.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_generate_embedding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(body_partial_json(serde_json::json!({
                "model": "clip",
                "mimeType": "image/jpeg"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"embedding": [0.25, 0.5, 0.75, 1.0]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpEmbeddingBackend::new(server.uri(), "clip".to_string()).with_dimension(4);
        let v = backend.generate_embedding(b"jpeg", "image/jpeg").await.unwrap();
        assert_eq!(v, vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(backend.dimension(), 4);
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"embedding": [1.0, 2.0]})),
            )
            .mount(&server)
            .await;

        let backend = HttpEmbeddingBackend::new(server.uri(), "clip".to_string());
        let err = backend.generate_embedding(b"x", "image/png").await.unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 512,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_http_error_surfaces_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(503).set_body_string("warming up"))
            .mount(&server)
            .await;

        let backend = HttpEmbeddingBackend::new(server.uri(), "clip".to_string());
        let err = backend.generate_embedding(b"x", "image/png").await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
        assert!(err.to_string().contains("warming up"));
    }
}
