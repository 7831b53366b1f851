use crate::keys::{generate_object_key, key_from_url, validate_key};
use crate::traits::{ByteReader, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for artifact storage (e.g., "/var/lib/marketplace/files")
    /// * `base_url` - Base URL for serving files (e.g., "http://localhost:4000/files")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
        })
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// Rejects keys with path traversal sequences and keys whose existing target
    /// resolves outside the base storage directory (e.g. through a symlink).
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        validate_key(storage_key)?;

        let path = self.base_path.join(storage_key);

        if let Ok(canonical) = path.canonicalize() {
            let base_canonical = self.base_path.canonicalize().map_err(|e| {
                StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
            })?;
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    fn url_to_path(&self, url: &str) -> StorageResult<PathBuf> {
        let key = key_from_url(&self.base_url, url)?;
        self.key_to_path(key)
    }

    /// Generate public URL for file
    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Copy `reader` into a sibling temp file, fsync it, then rename it over `path`.
    ///
    /// Readers never observe a partially written object.
    async fn write_atomic(&self, path: &Path, mut reader: ByteReader) -> StorageResult<u64> {
        self.ensure_parent_dir(path).await?;

        let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

        let result = async {
            let mut file = fs::File::create(&tmp_path).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to create file {}: {}",
                    tmp_path.display(),
                    e
                ))
            })?;

            let written = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to write file {}: {}",
                    tmp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to sync file {}: {}",
                    tmp_path.display(),
                    e
                ))
            })?;
            drop(file);

            fs::rename(&tmp_path, path).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to move {} into place: {}",
                    path.display(),
                    e
                ))
            })?;

            Ok::<u64, StorageError>(written)
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn store(
        &self,
        folder: &str,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> StorageResult<String> {
        let size = data.len() as u64;
        let reader: ByteReader = Box::pin(std::io::Cursor::new(data));
        self.store_stream(folder, filename, content_type, Some(size), reader)
            .await
    }

    async fn store_stream(
        &self,
        folder: &str,
        filename: &str,
        _content_type: &str,
        _content_length: Option<u64>,
        reader: ByteReader,
    ) -> StorageResult<String> {
        let key = generate_object_key(folder, filename)?;
        let path = self.key_to_path(&key)?;
        let start = std::time::Instant::now();

        let bytes_written = self.write_atomic(&path, reader).await.inspect_err(|e| {
            tracing::error!(
                error = %e,
                path = %path.display(),
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Local storage write failed"
            );
        })?;

        let url = self.generate_url(&key);

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = bytes_written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage write successful"
        );

        Ok(url)
    }

    async fn download(&self, url: &str) -> StorageResult<Vec<u8>> {
        let path = self.url_to_path(url)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(url.to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to read file {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            path = %path.display(),
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage download successful"
        );

        Ok(data)
    }

    async fn delete(&self, url: &str) -> StorageResult<()> {
        let path = self.url_to_path(url)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;

        tracing::info!(path = %path.display(), "Local storage delete successful");

        Ok(())
    }

    async fn exists(&self, url: &str) -> StorageResult<bool> {
        let path = self.url_to_path(url)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
