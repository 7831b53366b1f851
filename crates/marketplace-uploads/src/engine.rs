//! Upload engine façade
//!
//! Wires the session registry, chunk store, progress tracker and assembler together
//! behind the operations the HTTP layer exposes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use marketplace_core::{AppError, Config, SessionId, SessionManifest, SessionState, SessionStatus};
use marketplace_db::ChunkMetadataRepository;
use marketplace_storage::Storage;
use tokio::sync::broadcast;

use crate::assembler::Assembler;
use crate::chunk_store::{ChunkStore, ChunkStoreConfig};
use crate::events::{EventBus, UploadEvent};
use crate::locks::KeyedLocks;
use crate::progress::{Progress, ProgressTracker};
use crate::session::SessionRegistry;
use crate::sweeper::SessionSweeper;

/// Engine settings, usually derived from [`Config`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub chunk_root: PathBuf,
    pub assembly_temp_dir: PathBuf,
    /// Chunk size suggested to clients by `init`
    pub suggested_chunk_size: u64,
    pub max_chunk_size: u64,
    pub max_total_chunks: u32,
    pub session_ttl: Duration,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_root: PathBuf::from(config.chunk_storage_path()),
            assembly_temp_dir: PathBuf::from(config.assembly_temp_path()),
            suggested_chunk_size: config.chunk_size_bytes(),
            max_chunk_size: config.max_chunk_size_bytes(),
            max_total_chunks: config.max_total_chunks(),
            session_ttl: config.session_ttl(),
        }
    }
}

/// What happened to an uploaded chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkUploadStatus {
    /// The index was already stored; nothing was written.
    ChunkExists,
    ChunkUploaded,
    /// Stored, and every chunk of the session is now present.
    Complete,
}

impl ChunkUploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkUploadStatus::ChunkExists => "chunk_exists",
            ChunkUploadStatus::ChunkUploaded => "chunk_uploaded",
            ChunkUploadStatus::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub status: ChunkUploadStatus,
    pub chunk_index: u32,
    pub progress: Progress,
}

pub struct UploadEngine {
    registry: SessionRegistry,
    store: Arc<ChunkStore>,
    tracker: ProgressTracker,
    assembler: Assembler,
    assembly_locks: Arc<KeyedLocks<SessionId>>,
    events: EventBus,
    config: EngineConfig,
}

impl UploadEngine {
    pub async fn new(
        repository: Arc<dyn ChunkMetadataRepository>,
        storage: Arc<dyn Storage>,
        config: EngineConfig,
    ) -> Result<Self, AppError> {
        let events = EventBus::default();
        let assembly_locks = Arc::new(KeyedLocks::new());

        let store = Arc::new(
            ChunkStore::new(
                repository,
                ChunkStoreConfig {
                    root: config.chunk_root.clone(),
                    max_chunk_size: config.max_chunk_size,
                    max_total_chunks: config.max_total_chunks,
                },
                events.clone(),
            )
            .await?,
        );

        let assembler = Assembler::new(
            store.clone(),
            storage,
            config.assembly_temp_dir.clone(),
            assembly_locks.clone(),
            events.clone(),
        )
        .await?;

        Ok(Self {
            registry: SessionRegistry::new(config.max_total_chunks),
            tracker: ProgressTracker::new(store.clone()),
            store,
            assembler,
            assembly_locks,
            events,
            config,
        })
    }

    pub fn suggested_chunk_size(&self) -> u64 {
        self.config.suggested_chunk_size
    }

    pub fn max_chunk_size(&self) -> u64 {
        self.config.max_chunk_size
    }

    /// Open a new upload session
    pub fn init(&self, manifest: &SessionManifest) -> Result<SessionId, AppError> {
        self.registry.create_session(manifest)
    }

    /// Accept one chunk. An index that is already stored is acknowledged without
    /// rewriting it.
    pub async fn upload_chunk(
        &self,
        session_id: &SessionId,
        chunk_index: u32,
        manifest: &SessionManifest,
        payload: Bytes,
    ) -> Result<ChunkOutcome, AppError> {
        let total = i64::from(manifest.total_chunks);

        // A resend still has to agree with the recorded manifest and an open session.
        self.store.ensure_accepts(session_id, manifest).await?;

        if self.store.chunk_exists(session_id, chunk_index).await? {
            tracing::debug!(
                session_id = %session_id,
                chunk_index,
                "Chunk already stored"
            );
            return Ok(ChunkOutcome {
                status: ChunkUploadStatus::ChunkExists,
                chunk_index,
                progress: self.tracker.progress(session_id, total).await?,
            });
        }

        self.store
            .save_chunk(session_id, chunk_index, manifest, payload)
            .await?;
        let progress = self.tracker.progress(session_id, total).await?;

        let status = if progress.completed {
            tracing::info!(session_id = %session_id, "All chunks received");
            ChunkUploadStatus::Complete
        } else {
            ChunkUploadStatus::ChunkUploaded
        };

        Ok(ChunkOutcome {
            status,
            chunk_index,
            progress,
        })
    }

    pub async fn progress(
        &self,
        session_id: &SessionId,
        total_chunks: i64,
    ) -> Result<Progress, AppError> {
        self.tracker.progress(session_id, total_chunks).await
    }

    /// Assemble the session and return the artifact URL
    pub async fn complete(&self, session_id: &SessionId, folder: &str) -> Result<String, AppError> {
        self.assembler.assemble(session_id, folder).await
    }

    /// Cancel a session and purge its chunks.
    ///
    /// Whichever of `cancel` and `complete` records its status first wins; the other
    /// fails with `SessionClosed`.
    pub async fn cancel(&self, session_id: &SessionId) -> Result<(), AppError> {
        let state = self.store.session_state(session_id).await?;
        let status = match &state {
            SessionState::Initialized => self.store.record_cancelled(session_id).await?.status,
            SessionState::InProgress(_) => SessionStatus::InProgress,
            SessionState::Completed { .. } => SessionStatus::Completed,
            SessionState::Cancelled => return Ok(()),
        };

        match status {
            SessionStatus::Cancelled => {}
            SessionStatus::InProgress => {
                if let Err(e) = self
                    .store
                    .mark(session_id, SessionStatus::Cancelled, None)
                    .await
                {
                    // Lost a race: another cancel is a no-op, a completed assembly wins.
                    return match self.store.session_state(session_id).await? {
                        SessionState::Cancelled => Ok(()),
                        _ => Err(e),
                    };
                }
            }
            SessionStatus::Completed => {
                return Err(AppError::SessionClosed(format!(
                    "Upload {} is already completed",
                    session_id
                )));
            }
        }

        let report = self.store.purge(session_id).await;
        tracing::info!(
            session_id = %session_id,
            from_state = state.name(),
            chunks_removed = report.metadata_removed,
            purge_clean = report.is_clean(),
            "Upload cancelled"
        );

        Ok(())
    }

    pub async fn session_state(&self, session_id: &SessionId) -> Result<SessionState, AppError> {
        self.store.session_state(session_id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.events.subscribe()
    }

    /// Sweeper sharing this engine's store, locks and event bus
    pub fn sweeper(&self) -> SessionSweeper {
        SessionSweeper::new(
            self.store.clone(),
            self.assembly_locks.clone(),
            self.events.clone(),
            self.config.session_ttl,
        )
    }
}
