//! Marketplace Uploads
//!
//! The chunked upload and assembly engine. A client opens a session, sends the file as
//! independently transmitted chunks, polls progress, then asks for assembly:
//!
//! - [`SessionRegistry`] mints unguessable session ids.
//! - [`ChunkStore`] persists chunk payloads on disk and their metadata through a
//!   [`ChunkMetadataRepository`](marketplace_db::ChunkMetadataRepository).
//! - [`ProgressTracker`] derives completion from the received index set.
//! - [`Assembler`] concatenates chunks in index order and hands the artifact to the
//!   durable [`Storage`](marketplace_storage::Storage).
//! - [`SessionSweeper`] purges abandoned sessions in the background.
//!
//! [`UploadEngine`] ties them together for the HTTP layer.

pub mod assembler;
pub mod chunk_store;
pub mod engine;
pub mod events;
pub mod locks;
pub mod progress;
pub mod session;
pub mod sweeper;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use assembler::Assembler;
pub use chunk_store::{ChunkStore, ChunkStoreConfig, OrderedChunks, PurgeReport};
pub use engine::{ChunkOutcome, ChunkUploadStatus, EngineConfig, UploadEngine};
pub use events::{EventBus, UploadEvent};
pub use locks::{KeyedGuard, KeyedLocks};
pub use progress::{Progress, ProgressTracker};
pub use session::SessionRegistry;
pub use sweeper::{SessionSweeper, SweepReport};
