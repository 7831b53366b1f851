//! Domain models for chunked uploads.

pub mod upload;

pub use upload::{Chunk, SessionId, SessionManifest, SessionState, SessionStatus, UploadSession};
