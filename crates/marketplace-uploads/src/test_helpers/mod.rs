//! Test helpers for the upload engine
//!
//! In-memory doubles for the metadata repository and the durable object store, so the
//! engine and the HTTP layer can be tested without Postgres or a real bucket.

pub mod mock_repositories;
pub mod mock_storage;

pub use mock_repositories::MemoryChunkRepository;
pub use mock_storage::MockStorage;

use marketplace_core::{SessionId, SessionManifest};

/// Deterministic session id for tests
pub fn session_id(seed: u8) -> SessionId {
    SessionId::from_bytes([seed; 16])
}

/// Manifest for a `total_chunks`-chunk upload of `total_file_size` bytes
pub fn manifest(total_chunks: u32, total_file_size: u64) -> SessionManifest {
    SessionManifest {
        file_name: "bundle.zip".to_string(),
        content_type: "application/zip".to_string(),
        total_file_size,
        total_chunks,
    }
}
