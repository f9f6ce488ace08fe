//! Import session storage.
//!
//! Archive sessions record the entries extracted from an uploaded archive;
//! crawl sessions record the image URLs discovered on a crawled page. Both
//! are addressed by an opaque session id and referenced by entry index from
//! import job payloads.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use lumen_core::{
    ArchiveEntry, ArchiveSession, ArchiveSessions, CrawlSession, CrawlSessions, CrawledImage,
    Error, Result,
};

use crate::error::map_sqlx_error;

/// An extracted archive entry and the on-disk location of its bytes.
#[derive(Debug, Clone)]
pub struct NewArchiveEntry {
    pub name: String,
    pub extracted_path: String,
    pub size_bytes: u64,
}

/// PostgreSQL implementation of the archive and crawl session ports.
pub struct PgSessionRepository {
    pool: Pool<Postgres>,
}

impl PgSessionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Record an archive session. Entries are indexed in the given order.
    pub async fn create_archive_session(
        &self,
        session_id: &str,
        entries: &[NewArchiveEntry],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("INSERT INTO archive_sessions (id, created_at) VALUES ($1, $2)")
            .bind(session_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        for (index, entry) in entries.iter().enumerate() {
            let size = i64::try_from(entry.size_bytes)
                .map_err(|_| Error::InvalidInput(format!("entry {} too large", index)))?;
            sqlx::query(
                "INSERT INTO archive_session_entries
                    (session_id, entry_index, name, extracted_path, size_bytes)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(session_id)
            .bind(index as i32)
            .bind(&entry.name)
            .bind(&entry.extracted_path)
            .bind(size)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(
            subsystem = "db",
            component = "sessions",
            op = "create_archive_session",
            session_id,
            result_count = entries.len(),
            "Archive session recorded"
        );
        Ok(())
    }

    /// Record a crawl session from discovered `(url, alt_text)` pairs.
    pub async fn create_crawl_session(
        &self,
        session_id: &str,
        images: &[(String, Option<String>)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("INSERT INTO crawl_sessions (id, created_at) VALUES ($1, $2)")
            .bind(session_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        for (index, (url, alt_text)) in images.iter().enumerate() {
            sqlx::query(
                "INSERT INTO crawl_session_images (session_id, image_index, url, alt_text)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(session_id)
            .bind(index as i32)
            .bind(url)
            .bind(alt_text)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Delete a session of either kind. Entries cascade.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM archive_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        sqlx::query("DELETE FROM crawl_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl ArchiveSessions for PgSessionRepository {
    async fn find_session(&self, session_id: &str) -> Result<Option<ArchiveSession>> {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM archive_sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        if exists.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT entry_index, name, size_bytes FROM archive_session_entries
             WHERE session_id = $1 ORDER BY entry_index",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let entries = rows
            .iter()
            .map(|row| {
                let index: i32 = row.try_get("entry_index").map_err(map_sqlx_error)?;
                let size: i64 = row.try_get("size_bytes").map_err(map_sqlx_error)?;
                Ok(ArchiveEntry {
                    index: index.max(0) as usize,
                    name: row.try_get("name").map_err(map_sqlx_error)?,
                    size_bytes: size.max(0) as u64,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(ArchiveSession {
            id: session_id.to_string(),
            entries,
        }))
    }

    async fn read_entry(&self, session_id: &str, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        let path: Option<String> = sqlx::query_scalar(
            "SELECT extracted_path FROM archive_session_entries
             WHERE session_id = $1 AND entry_index = $2",
        )
        .bind(session_id)
        .bind(entry.index as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let path = path.ok_or_else(|| {
            Error::NotFound(format!("Entry {} not found in archive", entry.index))
        })?;
        Ok(tokio::fs::read(&path).await?)
    }
}

#[async_trait]
impl CrawlSessions for PgSessionRepository {
    async fn find_session(&self, session_id: &str) -> Result<Option<CrawlSession>> {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM crawl_sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        if exists.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT image_index, url, alt_text FROM crawl_session_images
             WHERE session_id = $1 ORDER BY image_index",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let images = rows
            .iter()
            .map(|row| {
                let index: i32 = row.try_get("image_index").map_err(map_sqlx_error)?;
                Ok(CrawledImage {
                    index: index.max(0) as usize,
                    url: row.try_get("url").map_err(map_sqlx_error)?,
                    alt_text: row.try_get("alt_text").map_err(map_sqlx_error)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(CrawlSession {
            id: session_id.to_string(),
            images,
        }))
    }
}
