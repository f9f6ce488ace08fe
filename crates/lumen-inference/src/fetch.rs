//! Remote image download with a size cap and magic-byte validation.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use lumen_core::{defaults, Error, FetchedImage, ImageFetcher, Result};

/// Downloads images over HTTP(S).
pub struct HttpImageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
    timeout_secs: u64,
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            max_bytes: defaults::FETCH_MAX_BYTES,
            timeout_secs: defaults::FETCH_TIMEOUT_SECS,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// MIME type sniffed from magic bytes, if the data is a known image format.
pub fn sniff_image_mime(data: &[u8]) -> Option<&'static str> {
    infer::get(data)
        .filter(|kind| matches!(kind.matcher_type(), infer::MatcherType::Image))
        .map(|kind| kind.mime_type())
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    #[instrument(skip(self), fields(subsystem = "inference", component = "fetch", op = "fetch"))]
    async fn fetch(&self, url: &str) -> Result<FetchedImage> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::InvalidInput(format!("Invalid URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "Unsupported URL scheme: {}",
                parsed.scheme()
            )));
        }

        let mut response = self
            .client
            .get(parsed)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await
            .map_err(|e| Error::Request(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Request(format!(
                "Fetching {} returned {}",
                url,
                response.status()
            )));
        }
        if let Some(len) = response.content_length() {
            if len > self.max_bytes as u64 {
                return Err(Error::InvalidInput(format!(
                    "Image too large: {} bytes (limit {})",
                    len, self.max_bytes
                )));
            }
        }

        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

        // Content-Length can be absent or wrong, so enforce the cap while reading.
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Request(format!("Failed to read {}: {}", url, e)))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(Error::InvalidInput(format!(
                    "Image too large: exceeds {} bytes",
                    self.max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        let sniffed = sniff_image_mime(&bytes).ok_or_else(|| {
            Error::InvalidInput(format!("Content at {} is not a supported image", url))
        })?;

        debug!(
            subsystem = "inference",
            component = "fetch",
            size_bytes = bytes.len(),
            declared = header_type.as_deref().unwrap_or("-"),
            sniffed,
            "Image fetched"
        );

        Ok(FetchedImage {
            bytes,
            content_type: Some(sniffed.to_string()),
        })
    }
}
