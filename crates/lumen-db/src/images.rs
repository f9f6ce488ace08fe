//! Image record repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use lumen_core::{
    defaults, new_v7, Error, Image, ImageRepository, ImageWithEmbedding, NewImage, Result,
};

use crate::error::map_sqlx_error;

const IMAGE_COLUMNS: &str = "id, file_name, storage_path, thumbnail_path, mime_type, width, \
                             height, size_bytes, content_hash, description, created_at";

/// PostgreSQL implementation of ImageRepository.
///
/// Embeddings are stored as raw little-endian `f32` blobs in `images.embedding`.
pub struct PgImageRepository {
    pool: Pool<Postgres>,
}

impl PgImageRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_image_row(row: &sqlx::postgres::PgRow) -> Result<Image> {
        let width: i32 = row.try_get("width").map_err(map_sqlx_error)?;
        let height: i32 = row.try_get("height").map_err(map_sqlx_error)?;
        let size_bytes: i64 = row.try_get("size_bytes").map_err(map_sqlx_error)?;
        Ok(Image {
            id: row.try_get("id").map_err(map_sqlx_error)?,
            file_name: row.try_get("file_name").map_err(map_sqlx_error)?,
            storage_path: row.try_get("storage_path").map_err(map_sqlx_error)?,
            thumbnail_path: row.try_get("thumbnail_path").map_err(map_sqlx_error)?,
            mime_type: row.try_get("mime_type").map_err(map_sqlx_error)?,
            width: width.max(0) as u32,
            height: height.max(0) as u32,
            size_bytes: size_bytes.max(0) as u64,
            content_hash: row.try_get("content_hash").map_err(map_sqlx_error)?,
            description: row.try_get("description").map_err(map_sqlx_error)?,
            created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        })
    }

    /// Every stored embedding blob, for hydrating the in-memory index at startup.
    pub async fn load_embeddings(&self) -> Result<Vec<(Uuid, Vec<u8>)>> {
        let rows = sqlx::query(
            "SELECT id, embedding FROM images WHERE embedding IS NOT NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id").map_err(map_sqlx_error)?;
                let blob: Vec<u8> = row.try_get("embedding").map_err(map_sqlx_error)?;
                Ok((id, blob))
            })
            .collect()
    }

    /// Drop an image's embedding. Returns whether a row was updated.
    pub async fn clear_embedding(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE images SET embedding = NULL, updated_at = $2
             WHERE id = $1 AND embedding IS NOT NULL",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ImageRepository for PgImageRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Image>> {
        let row = sqlx::query(&format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(Self::parse_image_row).transpose()
    }

    async fn find_by_id_with_embedding(&self, id: Uuid) -> Result<Option<ImageWithEmbedding>> {
        let row = sqlx::query(&format!(
            "SELECT {IMAGE_COLUMNS}, embedding FROM images WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ImageWithEmbedding {
            image: Self::parse_image_row(&row)?,
            embedding: row.try_get("embedding").map_err(map_sqlx_error)?,
        }))
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Image>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        // Preserve caller order; ids with no row are skipped.
        let mut by_id = std::collections::HashMap::with_capacity(rows.len());
        for row in &rows {
            let image = Self::parse_image_row(row)?;
            by_id.insert(image.id, image);
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn create(&self, image: NewImage) -> Result<Image> {
        let width = i32::try_from(image.width)
            .map_err(|_| Error::InvalidInput(format!("width out of range: {}", image.width)))?;
        let height = i32::try_from(image.height)
            .map_err(|_| Error::InvalidInput(format!("height out of range: {}", image.height)))?;
        let size_bytes = i64::try_from(image.size_bytes).map_err(|_| {
            Error::InvalidInput(format!("size out of range: {}", image.size_bytes))
        })?;

        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO images (id, file_name, storage_path, thumbnail_path, mime_type, width,
                                 height, size_bytes, content_hash, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
             RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(&image.file_name)
        .bind(&image.storage_path)
        .bind(&image.thumbnail_path)
        .bind(&image.mime_type)
        .bind(width)
        .bind(height)
        .bind(size_bytes)
        .bind(&image.content_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let created = Self::parse_image_row(&row)?;
        debug!(
            subsystem = "db",
            component = "images",
            op = "create",
            image_id = %created.id,
            size_bytes = created.size_bytes,
            "Image record created"
        );
        Ok(created)
    }

    async fn update_embedding(&self, id: Uuid, embedding: &[u8]) -> Result<()> {
        if embedding.len() != defaults::EMBEDDING_BYTE_LEN {
            return Err(Error::CorruptEmbedding {
                expected: defaults::EMBEDDING_BYTE_LEN,
                actual: embedding.len(),
            });
        }
        let result = sqlx::query("UPDATE images SET embedding = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(embedding)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("image {}", id)));
        }
        Ok(())
    }

    async fn update_description(&self, id: Uuid, description: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE images SET description = $2, updated_at = $3 WHERE id = $1")
                .bind(id)
                .bind(description)
                .bind(Utc::now())
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("image {}", id)));
        }
        Ok(())
    }
}
