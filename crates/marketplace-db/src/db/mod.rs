//! Database repositories for data access layer
//!
//! Each repository is responsible for a specific domain entity and provides CRUD
//! operations and specialized queries.

pub mod upload;

pub use upload::UploadChunkRepository;
