//! Repository trait for chunked upload metadata
//!
//! The upload engine only talks to this trait, so it can run against Postgres in
//! production and against an in-memory implementation in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketplace_core::error::AppError;
use marketplace_core::models::{Chunk, SessionId, SessionManifest, SessionStatus, UploadSession};
use std::collections::BTreeSet;

/// Persisted session manifests and chunk records
#[async_trait]
pub trait ChunkMetadataRepository: Send + Sync {
    /// Get a session by id
    async fn find_session(&self, session_id: &SessionId) -> Result<Option<UploadSession>, AppError>;

    /// Record the manifest for a session if none exists yet.
    ///
    /// Returns the recorded session; when a manifest already exists it wins and is
    /// returned unchanged, so callers can compare it against their own.
    async fn register_session(
        &self,
        session_id: &SessionId,
        manifest: &SessionManifest,
    ) -> Result<UploadSession, AppError>;

    /// Record a cancelled session that never received a manifest.
    ///
    /// An existing session is returned unchanged, so callers must check its status.
    async fn record_cancelled(&self, session_id: &SessionId) -> Result<UploadSession, AppError>;

    /// Insert or replace the record for `(chunk.session_id, chunk.chunk_index)` and
    /// touch the session's `updated_at`, atomically.
    ///
    /// Fails with `SessionClosed` unless the session is still in progress at the moment
    /// the record is written.
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), AppError>;

    async fn find_chunk(
        &self,
        session_id: &SessionId,
        chunk_index: u32,
    ) -> Result<Option<Chunk>, AppError>;

    /// All chunk records of a session, ascending by index
    async fn list_chunks(&self, session_id: &SessionId) -> Result<Vec<Chunk>, AppError>;

    /// Distinct chunk indices recorded for a session
    async fn received_indices(&self, session_id: &SessionId) -> Result<BTreeSet<u32>, AppError>;

    /// Move an in-progress session to `status`, setting the artifact URL when one is given.
    ///
    /// Fails with `SessionClosed` when the session already left in-progress and with
    /// `NotFound` when there is no such session.
    async fn mark_session(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
        artifact_url: Option<&str>,
    ) -> Result<(), AppError>;

    /// Delete every chunk record of a session, returning how many were removed
    async fn delete_chunks(&self, session_id: &SessionId) -> Result<u64, AppError>;

    /// Delete the session manifest (and, through it, any remaining chunk records)
    async fn delete_session(&self, session_id: &SessionId) -> Result<bool, AppError>;

    /// Sessions not updated since `cutoff`, oldest first
    async fn find_stale_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UploadSession>, AppError>;
}
