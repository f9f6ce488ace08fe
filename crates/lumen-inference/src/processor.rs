//! Raster image decoding and thumbnail generation.

use std::io::Cursor;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, ImageReader};

use lumen_core::{defaults, Error, ImageMetadata, ImageProcessor, Result};

/// `ImageProcessor` backed by the `image` crate. Decoding runs on the
/// blocking pool.
pub struct RasterImageProcessor {
    thumbnail_size: u32,
}

impl Default for RasterImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl RasterImageProcessor {
    pub fn new() -> Self {
        Self {
            thumbnail_size: defaults::THUMBNAIL_SIZE,
        }
    }

    /// Bounding box for thumbnails; aspect ratio is preserved.
    pub fn with_thumbnail_size(mut self, size: u32) -> Self {
        self.thumbnail_size = size.max(1);
        self
    }
}

fn read_metadata(data: &[u8]) -> Result<ImageMetadata> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| Error::InvalidInput(format!("Unreadable image: {}", e)))?;
    let format = reader
        .format()
        .ok_or_else(|| Error::InvalidInput("Unrecognized image format".to_string()))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| Error::InvalidInput(format!("Invalid image: {}", e)))?;
    Ok(ImageMetadata {
        width,
        height,
        mime_type: format.to_mime_type().to_string(),
    })
}

fn render_thumbnail(data: &[u8], size: u32) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(data)
        .map_err(|e| Error::InvalidInput(format!("Invalid image: {}", e)))?;
    let thumb = DynamicImage::ImageRgb8(decoded.thumbnail(size, size).to_rgb8());

    let mut out = Vec::new();
    thumb
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .map_err(|e| Error::Internal(format!("Thumbnail encoding failed: {}", e)))?;
    Ok(out)
}

#[async_trait]
impl ImageProcessor for RasterImageProcessor {
    async fn metadata(&self, data: &[u8]) -> Result<ImageMetadata> {
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || read_metadata(&data))
            .await
            .map_err(|e| Error::Internal(format!("Image decode task failed: {}", e)))?
    }

    async fn thumbnail(&self, data: &[u8]) -> Result<Vec<u8>> {
        let data = data.to_vec();
        let size = self.thumbnail_size;
        tokio::task::spawn_blocking(move || render_thumbnail(&data, size))
            .await
            .map_err(|e| Error::Internal(format!("Thumbnail task failed: {}", e)))?
    }
}
