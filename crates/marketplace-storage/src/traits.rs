//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed reader consumed by [`Storage::store_stream`].
pub type ByteReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Durable object store for assembled artifacts.
///
/// Objects are addressed by the URL returned from `store`/`store_stream`; every backend
/// knows how to map its own URLs back to internal keys. URLs from another backend or
/// base URL are rejected with `InvalidKey`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store a buffered object under `folder` and return its URL.
    ///
    /// The object name is generated (uuid + extension of `filename`), so repeated stores
    /// of the same file never collide.
    async fn store(
        &self,
        folder: &str,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> StorageResult<String>;

    /// Store an object from a reader (for large files) and return its URL.
    ///
    /// The reader is consumed until EOF. `content_length` is a hint and may be `None`.
    async fn store_stream(
        &self,
        folder: &str,
        filename: &str,
        content_type: &str,
        content_length: Option<u64>,
        reader: ByteReader,
    ) -> StorageResult<String>;

    /// Download an object by its URL
    async fn download(&self, url: &str) -> StorageResult<Vec<u8>>;

    /// Delete an object by its URL. Deleting a missing object succeeds.
    async fn delete(&self, url: &str) -> StorageResult<()>;

    /// Check if an object exists
    async fn exists(&self, url: &str) -> StorageResult<bool>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
