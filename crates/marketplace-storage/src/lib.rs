//! Marketplace Storage Library
//!
//! This crate provides the durable object store used for assembled upload artifacts.
//! It includes the Storage trait and implementations for S3 and local filesystem.
//!
//! # Object key format
//!
//! Every stored artifact gets a fresh object name so uploads never overwrite each other:
//!
//! - `{folder}/{uuid}.{ext}` when a folder is given
//! - `{uuid}.{ext}` otherwise
//!
//! The extension is taken from the client-supplied file name. Keys must not contain `..`
//! or a leading `/`. Key generation is centralized in the `keys` module so all backends
//! stay consistent. Objects are addressed by the URL returned from `store`.

pub mod factory;
pub(crate) mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use keys::normalize_folder;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use marketplace_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{ByteReader, Storage, StorageError, StorageResult};
