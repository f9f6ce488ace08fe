//! Filesystem-backed image storage.
//!
//! Files are written under a base directory using UUIDv7-derived paths:
//! `images/{first-2-hex}/{next-2-hex}/{uuid}.{ext}`. Writes go to a temp
//! file first and are renamed into place so readers never see a partial
//! image.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use lumen_core::{new_v7, Error, FileStorage, Result, StoredFile};

/// Image storage rooted at a local directory.
pub struct FilesystemStorage {
    base_path: PathBuf,
}

impl FilesystemStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Build from `STORAGE_PATH`, falling back to the default data directory.
    pub fn from_env() -> Self {
        let base = std::env::var("STORAGE_PATH")
            .unwrap_or_else(|_| lumen_core::defaults::STORAGE_PATH.to_string());
        Self::new(base)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a stored relative path, refusing anything that escapes the base.
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(Error::Storage(format!("invalid storage path: {}", path)));
        }
        Ok(self.base_path.join(relative))
    }

    /// Check that the backend can write, read and delete a file.
    ///
    /// Run once at startup to surface permission and mount problems early.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_dir = self.base_path.join("images/.health-check");
        let test_file = test_dir.join(".write_check");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", test_dir, e))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_back = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_back != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;
        let _ = fs::remove_dir(&test_dir).await;

        Ok(())
    }

    async fn write_atomic(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        debug!(
            subsystem = "storage",
            storage_path = %path,
            size_bytes = data.len(),
            "Writing file"
        );

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(subsystem = "storage", parent = %parent.display(), error = %e, "create_dir_all failed");
                e
            })?;
        }

        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            warn!(subsystem = "storage", from = %temp_path.display(), error = %e, "rename failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl FileStorage for FilesystemStorage {
    async fn save_file(&self, file_name: &str, data: &[u8]) -> Result<StoredFile> {
        let path = generate_storage_path(&new_v7(), &file_extension(file_name));
        self.write_atomic(&path, data).await?;
        Ok(StoredFile {
            path,
            size_bytes: data.len() as u64,
            content_hash: compute_content_hash(data),
        })
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("file {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn file_size(&self, path: &str) -> Result<u64> {
        let full_path = self.full_path(path)?;
        match fs::metadata(&full_path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("file {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        Ok(fs::try_exists(full_path).await?)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Compute BLAKE3 hash of data with "blake3:" prefix.
pub fn compute_content_hash(data: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(data).to_hex())
}

/// Storage path for a UUID: `images/{first-2-hex}/{next-2-hex}/{uuid}.{ext}`.
pub fn generate_storage_path(uuid: &Uuid, extension: &str) -> String {
    let hex = uuid.simple().to_string();
    format!(
        "images/{}/{}/{}.{}",
        &hex[0..2],
        &hex[2..4],
        uuid.as_hyphenated(),
        extension
    )
}

/// Lowercase alphanumeric extension of a file name, or `bin`.
fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map_or_else(|| "bin".to_string(), |e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_format() {
        let hash = compute_content_hash(b"hello");
        assert!(hash.starts_with("blake3:"));
        assert_eq!(hash.len(), "blake3:".len() + 64);
        assert_eq!(hash, compute_content_hash(b"hello"));
    }

    #[test]
    fn test_storage_path_layout() {
        let id = Uuid::parse_str("01948f7e-8b2a-7c3d-9e4f-5a6b7c8d9e0f").unwrap();
        assert_eq!(
            generate_storage_path(&id, "png"),
            "images/01/94/01948f7e-8b2a-7c3d-9e4f-5a6b7c8d9e0f.png"
        );
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("photo.JPG"), "jpg");
        assert_eq!(file_extension("archive/cat.webp"), "webp");
        assert_eq!(file_extension("noext"), "bin");
        assert_eq!(file_extension("weird.p n g"), "bin");
    }

    #[tokio::test]
    async fn test_save_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());

        let stored = storage.save_file("cat.png", b"pixels").await.unwrap();
        assert!(stored.path.starts_with("images/"));
        assert!(stored.path.ends_with(".png"));
        assert_eq!(stored.size_bytes, 6);
        assert_eq!(stored.content_hash, compute_content_hash(b"pixels"));

        assert!(storage.file_exists(&stored.path).await.unwrap());
        assert_eq!(storage.read_file(&stored.path).await.unwrap(), b"pixels");
        assert_eq!(storage.file_size(&stored.path).await.unwrap(), 6);

        storage.delete_file(&stored.path).await.unwrap();
        assert!(!storage.file_exists(&stored.path).await.unwrap());
        // Deleting again is not an error.
        storage.delete_file(&stored.path).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        let stored = storage.save_file("a.JPG", b"data").await.unwrap();
        assert!(stored.path.ends_with(".jpg"));

        let parent = dir.path().join(&stored.path);
        let parent = parent.parent().unwrap();
        let names: Vec<String> = std::fs::read_dir(parent)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].ends_with(".tmp"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        let err = storage.read_file("images/00/00/missing.png").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!storage.file_exists("images/00/00/missing.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        assert!(storage.read_file("../etc/passwd").await.is_err());
        assert!(storage.read_file("/etc/passwd").await.is_err());
        assert!(storage.delete_file("").await.is_err());
    }

    #[tokio::test]
    async fn test_validate_succeeds_on_writable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        storage.validate().await.unwrap();
    }
}
