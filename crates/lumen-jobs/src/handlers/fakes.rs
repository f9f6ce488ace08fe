//! In-memory collaborators for handler tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use lumen_core::{
    new_v7, ArchiveEntry, ArchiveSession, ArchiveSessions, CrawlSession, CrawlSessions,
    CrawledImage, Error, FetchedImage, FileStorage, Image, ImageFetcher, ImageMetadata,
    ImageProcessor, ImageRepository, ImageWithEmbedding, NewImage, RepositoryErrorKind, Result,
    StoredFile,
};

fn guard<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// FILE STORAGE
// =============================================================================

#[derive(Default)]
pub struct FakeStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
    fail_delete: bool,
    fail_save: bool,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn failing_save(mut self) -> Self {
        self.fail_save = true;
        self
    }

    pub fn insert(&self, path: &str, data: &[u8]) {
        guard(&self.files).insert(path.to_string(), data.to_vec());
    }

    pub fn file_count(&self) -> usize {
        guard(&self.files).len()
    }

    pub fn deleted(&self) -> Vec<String> {
        guard(&self.deleted).clone()
    }
}

#[async_trait]
impl FileStorage for FakeStorage {
    async fn save_file(&self, file_name: &str, data: &[u8]) -> Result<StoredFile> {
        if self.fail_save {
            return Err(Error::Storage("disk full".to_string()));
        }
        let path = format!("images/{}/{}", new_v7(), file_name);
        guard(&self.files).insert(path.clone(), data.to_vec());
        Ok(StoredFile {
            path,
            size_bytes: data.len() as u64,
            content_hash: format!("hash-{}", data.len()),
        })
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        guard(&self.files)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", path)))
    }

    async fn file_size(&self, path: &str) -> Result<u64> {
        Ok(self.read_file(path).await?.len() as u64)
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(guard(&self.files).contains_key(path))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        if self.fail_delete {
            return Err(Error::Storage("permission denied".to_string()));
        }
        guard(&self.files).remove(path);
        guard(&self.deleted).push(path.to_string());
        Ok(())
    }
}

// =============================================================================
// IMAGE PROCESSOR
// =============================================================================

/// Reports a fixed PNG geometry unless told to reject input.
pub struct StubProcessor {
    reject_metadata: bool,
}

impl StubProcessor {
    pub fn ok() -> Self {
        Self {
            reject_metadata: false,
        }
    }

    pub fn bad_metadata() -> Self {
        Self {
            reject_metadata: true,
        }
    }
}

#[async_trait]
impl ImageProcessor for StubProcessor {
    async fn metadata(&self, data: &[u8]) -> Result<ImageMetadata> {
        if self.reject_metadata || data.starts_with(b"junk") {
            return Err(Error::InvalidInput("Unrecognized image format".to_string()));
        }
        Ok(ImageMetadata {
            width: 64,
            height: 48,
            mime_type: "image/png".to_string(),
        })
    }

    async fn thumbnail(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.iter().take(8).copied().collect())
    }
}

// =============================================================================
// IMAGE REPOSITORY
// =============================================================================

#[derive(Default)]
pub struct FakeImages {
    images: Mutex<HashMap<Uuid, ImageWithEmbedding>>,
    fail_create: bool,
}

impl FakeImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Seed a record pointing at `storage_path`.
    pub fn seed(&self, storage_path: &str, mime_type: &str) -> Uuid {
        let id = new_v7();
        let image = Image {
            id,
            file_name: storage_path.rsplit('/').next().unwrap_or(storage_path).to_string(),
            storage_path: storage_path.to_string(),
            thumbnail_path: None,
            mime_type: mime_type.to_string(),
            width: 64,
            height: 48,
            size_bytes: 0,
            content_hash: None,
            description: None,
            created_at: Utc::now(),
        };
        guard(&self.images).insert(
            id,
            ImageWithEmbedding {
                image,
                embedding: None,
            },
        );
        id
    }

    pub fn get(&self, id: Uuid) -> Option<Image> {
        guard(&self.images).get(&id).map(|i| i.image.clone())
    }

    pub fn embedding(&self, id: Uuid) -> Option<Vec<u8>> {
        guard(&self.images).get(&id).and_then(|i| i.embedding.clone())
    }

    pub fn count(&self) -> usize {
        guard(&self.images).len()
    }
}

#[async_trait]
impl ImageRepository for FakeImages {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Image>> {
        Ok(self.get(id))
    }

    async fn find_by_id_with_embedding(&self, id: Uuid) -> Result<Option<ImageWithEmbedding>> {
        Ok(guard(&self.images).get(&id).cloned())
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Image>> {
        let images = guard(&self.images);
        Ok(ids
            .iter()
            .filter_map(|id| images.get(id).map(|i| i.image.clone()))
            .collect())
    }

    async fn create(&self, new: NewImage) -> Result<Image> {
        if self.fail_create {
            return Err(Error::repository(RepositoryErrorKind::Other, "insert failed"));
        }
        let image = Image {
            id: new_v7(),
            file_name: new.file_name,
            storage_path: new.storage_path,
            thumbnail_path: new.thumbnail_path,
            mime_type: new.mime_type,
            width: new.width,
            height: new.height,
            size_bytes: new.size_bytes,
            content_hash: new.content_hash,
            description: None,
            created_at: Utc::now(),
        };
        guard(&self.images).insert(
            image.id,
            ImageWithEmbedding {
                image: image.clone(),
                embedding: None,
            },
        );
        Ok(image)
    }

    async fn update_embedding(&self, id: Uuid, embedding: &[u8]) -> Result<()> {
        match guard(&self.images).get_mut(&id) {
            Some(record) => {
                record.embedding = Some(embedding.to_vec());
                Ok(())
            }
            None => Err(Error::NotFound(format!("Image not found: {}", id))),
        }
    }

    async fn update_description(&self, id: Uuid, description: &str) -> Result<()> {
        match guard(&self.images).get_mut(&id) {
            Some(record) => {
                record.image.description = Some(description.to_string());
                Ok(())
            }
            None => Err(Error::NotFound(format!("Image not found: {}", id))),
        }
    }
}

// =============================================================================
// IMPORT SESSIONS
// =============================================================================

#[derive(Default)]
pub struct FakeArchives {
    sessions: Mutex<HashMap<String, (ArchiveSession, HashMap<usize, Vec<u8>>)>>,
}

impl FakeArchives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session whose entry `i` holds `entries[i]`.
    pub fn add_session(&self, id: &str, entries: &[(&str, &str)]) {
        let session = ArchiveSession {
            id: id.to_string(),
            entries: entries
                .iter()
                .enumerate()
                .map(|(index, (name, data))| ArchiveEntry {
                    index,
                    name: name.to_string(),
                    size_bytes: data.len() as u64,
                })
                .collect(),
        };
        let contents = entries
            .iter()
            .enumerate()
            .map(|(index, (_, data))| (index, data.as_bytes().to_vec()))
            .collect();
        guard(&self.sessions).insert(id.to_string(), (session, contents));
    }
}

#[async_trait]
impl ArchiveSessions for FakeArchives {
    async fn find_session(&self, session_id: &str) -> Result<Option<ArchiveSession>> {
        Ok(guard(&self.sessions)
            .get(session_id)
            .map(|(session, _)| session.clone()))
    }

    async fn read_entry(&self, session_id: &str, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        guard(&self.sessions)
            .get(session_id)
            .and_then(|(_, contents)| contents.get(&entry.index).cloned())
            .ok_or_else(|| Error::NotFound(format!("Extracted file missing: {}", entry.name)))
    }
}

#[derive(Default)]
pub struct FakeCrawls {
    sessions: Mutex<HashMap<String, CrawlSession>>,
}

impl FakeCrawls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&self, id: &str, urls: &[&str]) {
        let session = CrawlSession {
            id: id.to_string(),
            images: urls
                .iter()
                .enumerate()
                .map(|(index, url)| CrawledImage {
                    index,
                    url: url.to_string(),
                    alt_text: None,
                })
                .collect(),
        };
        guard(&self.sessions).insert(id.to_string(), session);
    }
}

#[async_trait]
impl CrawlSessions for FakeCrawls {
    async fn find_session(&self, session_id: &str) -> Result<Option<CrawlSession>> {
        Ok(guard(&self.sessions).get(session_id).cloned())
    }
}

// =============================================================================
// FETCHER
// =============================================================================

/// Serves canned bodies by URL; unknown URLs fail like a 404.
#[derive(Default)]
pub struct FakeFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: &[u8]) {
        guard(&self.bodies).insert(url.to_string(), body.to_vec());
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage> {
        guard(&self.bodies)
            .get(url)
            .map(|bytes| FetchedImage {
                bytes: bytes.clone(),
                content_type: None,
            })
            .ok_or_else(|| Error::Request(format!("HTTP 404 fetching {}", url)))
    }
}

/// Smallest valid PNG header, enough for magic-byte sniffing.
pub const PNG_MAGIC: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52,
];
