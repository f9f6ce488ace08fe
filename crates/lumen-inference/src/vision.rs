//! Ollama vision backend for captions and text extraction.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use lumen_core::{defaults, CaptionBackend, Error, OcrBackend, Result};

const CAPTION_PROMPT: &str = "Describe this image in one or two sentences. \
Mention the main subject, the setting and any notable colors.";

const OCR_PROMPT: &str = "Transcribe all text visible in this image exactly as written. \
If there is no text, reply with nothing.";

/// Ollama-based vision backend (e.g., qwen3-vl, llava).
pub struct OllamaVisionBackend {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OllamaVisionBackend {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: reqwest::Client::new(),
            timeout_secs: defaults::VISION_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Create from environment variables.
    /// Returns None if OLLAMA_VISION_MODEL is set to an empty string.
    pub fn from_env() -> Option<Self> {
        let model = std::env::var(defaults::ENV_OLLAMA_VISION_MODEL)
            .unwrap_or_else(|_| defaults::DEFAULT_OLLAMA_VISION_MODEL.to_string());
        if model.is_empty() {
            return None;
        }
        let base_url =
            std::env::var("OLLAMA_URL").unwrap_or_else(|_| defaults::OLLAMA_URL.to_string());
        Some(Self::new(base_url, model))
    }

    /// Check if the Ollama server answers.
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn generate(&self, image_data: &[u8], prompt: String) -> Result<String> {
        let start = Instant::now();
        let request = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt,
            images: vec![base64::engine::general_purpose::STANDARD.encode(image_data)],
            stream: false,
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Vision request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "Vision API returned {}: {}",
                status, body
            )));
        }

        let result: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse vision response: {}", e)))?;

        debug!(
            subsystem = "inference",
            component = "vision",
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            "Vision generation complete"
        );
        Ok(result.response.trim().to_string())
    }
}

#[derive(Serialize)]
struct OllamaGenerateRequest {
    model: String,
    prompt: String,
    images: Vec<String>, // base64 encoded
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Caption prompt, grounded with extracted text when there is any.
fn caption_prompt(context: Option<&str>) -> String {
    match context.map(str::trim).filter(|c| !c.is_empty()) {
        Some(text) => format!(
            "{}\n\nText found in the image, use it if relevant:\n{}",
            CAPTION_PROMPT, text
        ),
        None => CAPTION_PROMPT.to_string(),
    }
}

#[async_trait]
impl CaptionBackend for OllamaVisionBackend {
    #[instrument(skip(self, image_data, context), fields(subsystem = "inference", component = "vision", op = "caption"))]
    async fn generate_caption(
        &self,
        image_data: &[u8],
        _mime_type: &str,
        context: Option<&str>,
    ) -> Result<String> {
        let caption = self.generate(image_data, caption_prompt(context)).await?;
        if caption.is_empty() {
            return Err(Error::Inference("Vision model returned an empty caption".into()));
        }
        Ok(caption)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl OcrBackend for OllamaVisionBackend {
    #[instrument(skip(self, image_data), fields(subsystem = "inference", component = "vision", op = "ocr"))]
    async fn extract_text(&self, image_data: &[u8], _mime_type: &str) -> Result<String> {
        self.generate(image_data, OCR_PROMPT.to_string()).await
    }
}
