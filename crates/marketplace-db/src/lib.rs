//! Marketplace Database Layer
//!
//! This crate persists chunked upload session manifests and per-chunk metadata.
//!
// Module declarations
pub mod db;
pub mod upload_traits;

// Re-exports: Repositories
pub use db::UploadChunkRepository;

// Re-exports: Repository traits
pub use upload_traits::ChunkMetadataRepository;
