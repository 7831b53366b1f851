//! Marketplace Core Library
//!
//! This crate provides the domain models, error types and configuration shared by the
//! chunked upload engine, its storage collaborators and the HTTP API.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{
    Chunk, SessionId, SessionManifest, SessionState, SessionStatus, UploadSession,
};
pub use storage_types::StorageBackend;
