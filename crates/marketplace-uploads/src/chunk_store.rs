//! Chunk Store
//!
//! Chunk payloads live on local disk under `{root}/{session_id}/{index:08}.part`; their
//! metadata goes through a [`ChunkMetadataRepository`]. Payloads are always written
//! before metadata is recorded, so a failed write never counts as a received chunk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use marketplace_core::{
    AppError, Chunk, SessionId, SessionManifest, SessionState, SessionStatus, UploadSession,
};
use marketplace_db::ChunkMetadataRepository;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::events::{EventBus, UploadEvent};
use crate::locks::KeyedLocks;

/// Chunk store settings
#[derive(Debug, Clone)]
pub struct ChunkStoreConfig {
    /// Directory for chunk payloads
    pub root: PathBuf,
    /// Largest accepted payload, in bytes
    pub max_chunk_size: u64,
    /// Largest accepted `total_chunks`
    pub max_total_chunks: u32,
}

/// Outcome of purging a session's chunks
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub metadata_removed: u64,
    pub payloads_removed: usize,
    /// Human-readable descriptions of everything that could not be removed
    pub failures: Vec<String>,
}

impl PurgeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Persists individual chunks keyed by `(session, index)`
pub struct ChunkStore {
    repository: Arc<dyn ChunkMetadataRepository>,
    config: ChunkStoreConfig,
    write_locks: KeyedLocks<(SessionId, u32)>,
    events: EventBus,
}

impl ChunkStore {
    pub async fn new(
        repository: Arc<dyn ChunkMetadataRepository>,
        config: ChunkStoreConfig,
        events: EventBus,
    ) -> Result<Self, AppError> {
        fs::create_dir_all(&config.root).await.map_err(|e| {
            AppError::IoFailure(format!(
                "Failed to create chunk directory {}: {}",
                config.root.display(),
                e
            ))
        })?;

        Ok(Self {
            repository,
            config,
            write_locks: KeyedLocks::new(),
            events,
        })
    }

    pub fn config(&self) -> &ChunkStoreConfig {
        &self.config
    }

    pub async fn chunk_exists(
        &self,
        session_id: &SessionId,
        chunk_index: u32,
    ) -> Result<bool, AppError> {
        Ok(self
            .repository
            .find_chunk(session_id, chunk_index)
            .await?
            .is_some())
    }

    /// Persist one chunk, replacing any earlier payload for the same index.
    ///
    /// The first chunk of a session records its manifest; later chunks must carry the
    /// same manifest. Writes to the same `(session, index)` are serialized, last writer
    /// wins.
    #[tracing::instrument(
        skip_all,
        fields(session_id = %session_id, chunk_index = chunk_index, payload_size = payload.len())
    )]
    pub async fn save_chunk(
        &self,
        session_id: &SessionId,
        chunk_index: u32,
        manifest: &SessionManifest,
        payload: Bytes,
    ) -> Result<Chunk, AppError> {
        manifest.validate(self.config.max_total_chunks)?;

        if chunk_index >= manifest.total_chunks {
            return Err(AppError::InvalidRequest(format!(
                "chunkNumber {} is out of range for {} chunks (numbering starts at 0)",
                chunk_index, manifest.total_chunks
            )));
        }

        let payload_size = payload.len() as u64;
        if payload_size > self.config.max_chunk_size {
            return Err(AppError::PayloadTooLarge(format!(
                "Chunk of {} bytes exceeds the {} byte limit",
                payload_size, self.config.max_chunk_size
            )));
        }

        let recorded = match self.repository.find_session(session_id).await? {
            Some(session) => session,
            None => {
                self.repository
                    .register_session(session_id, manifest)
                    .await?
            }
        };
        ensure_accepts_chunks(&recorded, manifest)?;

        let _guard = self
            .write_locks
            .lock((session_id.clone(), chunk_index))
            .await;

        let location = payload_location(session_id, chunk_index);
        let path = self.config.root.join(&location);
        write_payload(&path, &payload).await?;

        let chunk = Chunk {
            session_id: session_id.clone(),
            chunk_index,
            payload_size,
            payload_location: location,
            received_at: Utc::now(),
            completed: true,
        };
        if let Err(e) = self.repository.upsert_chunk(&chunk).await {
            // The session closed or expired while the payload was being written; its
            // purge may already have run, so the payload is ours to remove.
            if matches!(e, AppError::SessionClosed(_) | AppError::NotFound(_)) {
                discard_payload(&path).await;
            }
            return Err(e);
        }

        tracing::debug!("Chunk stored");

        Ok(chunk)
    }

    /// Check a chunk against the recorded session without writing anything.
    ///
    /// Unknown sessions pass; they are registered by their first chunk.
    pub async fn ensure_accepts(
        &self,
        session_id: &SessionId,
        manifest: &SessionManifest,
    ) -> Result<(), AppError> {
        match self.repository.find_session(session_id).await? {
            Some(recorded) => ensure_accepts_chunks(&recorded, manifest),
            None => Ok(()),
        }
    }

    /// Number of distinct chunk indices recorded
    pub async fn completed_chunk_count(&self, session_id: &SessionId) -> Result<usize, AppError> {
        Ok(self.repository.received_indices(session_id).await?.len())
    }

    pub async fn received_indices(&self, session_id: &SessionId) -> Result<BTreeSet<u32>, AppError> {
        self.repository.received_indices(session_id).await
    }

    pub async fn find_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<UploadSession>, AppError> {
        self.repository.find_session(session_id).await
    }

    /// Explicit state of a session, derived from its manifest and received chunks
    pub async fn session_state(&self, session_id: &SessionId) -> Result<SessionState, AppError> {
        let Some(session) = self.repository.find_session(session_id).await? else {
            return Ok(SessionState::Initialized);
        };

        match session.status {
            SessionStatus::InProgress => Ok(SessionState::InProgress(
                self.repository.received_indices(session_id).await?,
            )),
            SessionStatus::Completed => Ok(SessionState::Completed {
                artifact_url: session.artifact_url.unwrap_or_default(),
            }),
            SessionStatus::Cancelled => Ok(SessionState::Cancelled),
        }
    }

    /// Chunks of a session in ascending index order
    pub async fn ordered_chunks(&self, session_id: &SessionId) -> Result<OrderedChunks, AppError> {
        let mut chunks = self.repository.list_chunks(session_id).await?;
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        Ok(OrderedChunks {
            root: self.config.root.clone(),
            chunks,
        })
    }

    pub async fn mark(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
        artifact_url: Option<&str>,
    ) -> Result<(), AppError> {
        self.repository
            .mark_session(session_id, status, artifact_url)
            .await
    }

    /// Record a cancelled tombstone for a session that has no manifest yet.
    ///
    /// Returns the recorded session, which is not cancelled if a first chunk registered
    /// it in the meantime.
    pub async fn record_cancelled(&self, session_id: &SessionId) -> Result<UploadSession, AppError> {
        self.repository.record_cancelled(session_id).await
    }

    /// Sessions untouched since `cutoff`, oldest first
    pub async fn stale_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UploadSession>, AppError> {
        self.repository.find_stale_sessions(cutoff, limit).await
    }

    /// Drop a session's manifest; call after [`ChunkStore::purge`].
    pub async fn forget_session(&self, session_id: &SessionId) -> Result<bool, AppError> {
        self.repository.delete_session(session_id).await
    }

    /// Delete every chunk payload and record of a session.
    ///
    /// Best-effort: failures are collected in the report, logged and published as
    /// [`UploadEvent::CleanupIncomplete`], never returned as errors.
    pub async fn purge(&self, session_id: &SessionId) -> PurgeReport {
        let mut report = PurgeReport::default();

        match self.repository.delete_chunks(session_id).await {
            Ok(removed) => report.metadata_removed = removed,
            Err(e) => report.failures.push(format!("chunk metadata: {}", e)),
        }

        let dir = self.config.root.join(session_id.as_str());
        match remove_payload_dir(&dir).await {
            Ok(removed) => report.payloads_removed = removed,
            Err(failures) => report.failures.extend(failures),
        }

        if report.is_clean() {
            tracing::debug!(
                session_id = %session_id,
                metadata_removed = report.metadata_removed,
                payloads_removed = report.payloads_removed,
                "Session chunks purged"
            );
        } else {
            tracing::warn!(
                session_id = %session_id,
                failures = ?report.failures,
                "Session purge incomplete"
            );
            self.events.publish(UploadEvent::CleanupIncomplete {
                session_id: session_id.clone(),
                failures: report.failures.clone(),
            });
        }

        report
    }

    /// Remove payload directories that have no recorded session and have not been
    /// touched for `older_than`. These are left behind by writes that crashed before
    /// their manifest was recorded.
    pub async fn remove_orphan_payloads(&self, older_than: Duration) -> Result<usize, AppError> {
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        let mut entries = fs::read_dir(&self.config.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(session_id) = name.to_str().and_then(|n| n.parse::<SessionId>().ok()) else {
                continue;
            };

            let modified = entry.metadata().await.and_then(|m| m.modified());
            if !matches!(modified, Ok(time) if time <= cutoff) {
                continue;
            }
            // Writers record the manifest before creating the directory.
            if self.repository.find_session(&session_id).await?.is_some() {
                continue;
            }

            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    removed += 1;
                    tracing::info!(session_id = %session_id, "Removed orphaned chunk payloads");
                }
                Err(e) => tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to remove orphaned chunk payloads"
                ),
            }
        }

        Ok(removed)
    }
}

/// Snapshot of a session's chunk records, ascending by index.
///
/// Payloads are read lazily; [`OrderedChunks::payloads`] can be called again to
/// restart from the first chunk.
#[derive(Debug, Clone)]
pub struct OrderedChunks {
    root: PathBuf,
    chunks: Vec<Chunk>,
}

impl OrderedChunks {
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn total_size(&self) -> u64 {
        self.chunks.iter().map(|chunk| chunk.payload_size).sum()
    }

    /// Stream each chunk's payload in order, checking it against its recorded size.
    pub fn payloads(&self) -> impl Stream<Item = Result<Bytes, AppError>> + Send + 'static {
        let root = self.root.clone();
        stream::iter(self.chunks.clone()).then(move |chunk| {
            let path = root.join(&chunk.payload_location);
            async move { read_payload(&path, &chunk).await }
        })
    }
}

fn ensure_accepts_chunks(
    recorded: &UploadSession,
    manifest: &SessionManifest,
) -> Result<(), AppError> {
    if recorded.status != SessionStatus::InProgress {
        return Err(AppError::SessionClosed(format!(
            "Upload {} is {}",
            recorded.session_id, recorded.status
        )));
    }
    if let Some(conflict) = recorded
        .manifest
        .as_ref()
        .and_then(|recorded| recorded.conflict_with(manifest))
    {
        return Err(AppError::InvalidRequest(conflict));
    }
    Ok(())
}

fn payload_location(session_id: &SessionId, chunk_index: u32) -> String {
    format!("{}/{:08}.part", session_id, chunk_index)
}

/// Write to a sibling temp file, fsync, then rename over `path`.
async fn write_payload(path: &Path, payload: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

    let result = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(payload).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path).await;
        tracing::error!(path = %path.display(), error = %e, "Chunk payload write failed");
        return Err(AppError::IoFailure(format!(
            "Failed to write chunk payload: {}",
            e
        )));
    }

    Ok(())
}

/// Remove a payload written for a session that closed underneath it, and the session
/// directory if that leaves it empty.
async fn discard_payload(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to discard chunk payload");
        }
    }
    if let Some(dir) = path.parent() {
        let _ = fs::remove_dir(dir).await;
    }
}

async fn read_payload(path: &Path, chunk: &Chunk) -> Result<Bytes, AppError> {
    let data = fs::read(path).await.map_err(|e| {
        AppError::IoFailure(format!(
            "Failed to read chunk {} payload: {}",
            chunk.chunk_index, e
        ))
    })?;

    if data.len() as u64 != chunk.payload_size {
        return Err(AppError::IoFailure(format!(
            "Chunk {} payload is {} bytes, {} recorded",
            chunk.chunk_index,
            data.len(),
            chunk.payload_size
        )));
    }

    Ok(Bytes::from(data))
}

/// Remove a session's payload directory, returning how many payload files were removed.
async fn remove_payload_dir(dir: &Path) -> Result<usize, Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(vec![format!("{}: {}", dir.display(), e)]),
    };

    let mut removed = 0;
    let mut failures = Vec::new();

    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => failures.push(format!("{}: {}", entry.path().display(), e)),
            },
            Ok(None) => break,
            Err(e) => {
                failures.push(format!("{}: {}", dir.display(), e));
                break;
            }
        }
    }

    if let Err(e) = fs::remove_dir(dir).await {
        failures.push(format!("{}: {}", dir.display(), e));
    }

    if failures.is_empty() {
        Ok(removed)
    } else {
        Err(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{manifest, session_id, MemoryChunkRepository};
    use tempfile::tempdir;

    async fn store(root: &Path, repository: Arc<MemoryChunkRepository>) -> ChunkStore {
        ChunkStore::new(
            repository,
            ChunkStoreConfig {
                root: root.to_path_buf(),
                max_chunk_size: 1024,
                max_total_chunks: 100,
            },
            EventBus::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_resend_same_index_keeps_count() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), Arc::new(MemoryChunkRepository::new())).await;
        let id = session_id(1);
        let manifest = manifest(3, 6);

        store
            .save_chunk(&id, 1, &manifest, Bytes::from_static(b"BB"))
            .await
            .unwrap();
        assert_eq!(store.completed_chunk_count(&id).await.unwrap(), 1);

        store
            .save_chunk(&id, 1, &manifest, Bytes::from_static(b"bb"))
            .await
            .unwrap();
        assert_eq!(store.completed_chunk_count(&id).await.unwrap(), 1);

        let stored = std::fs::read(dir.path().join(payload_location(&id, 1))).unwrap();
        assert_eq!(stored, b"bb");
    }

    #[tokio::test]
    async fn test_out_of_range_index_rejected() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), Arc::new(MemoryChunkRepository::new())).await;
        let id = session_id(2);

        let result = store
            .save_chunk(&id, 3, &manifest(3, 6), Bytes::from_static(b"XX"))
            .await;
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
        assert_eq!(store.session_state(&id).await.unwrap(), SessionState::Initialized);
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), Arc::new(MemoryChunkRepository::new())).await;

        let result = store
            .save_chunk(
                &session_id(3),
                0,
                &manifest(1, 2048),
                Bytes::from(vec![0u8; 2048]),
            )
            .await;
        assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
    }

    #[tokio::test]
    async fn test_manifest_mismatch_rejected_without_write() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), Arc::new(MemoryChunkRepository::new())).await;
        let id = session_id(4);

        store
            .save_chunk(&id, 0, &manifest(3, 6), Bytes::from_static(b"AA"))
            .await
            .unwrap();

        let result = store
            .save_chunk(&id, 1, &manifest(4, 8), Bytes::from_static(b"BB"))
            .await;
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
        assert!(!store.chunk_exists(&id, 1).await.unwrap());
        assert!(!dir.path().join(payload_location(&id, 1)).exists());
    }

    #[tokio::test]
    async fn test_failed_payload_write_records_nothing() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), Arc::new(MemoryChunkRepository::new())).await;
        let id = session_id(5);

        // A plain file where the session directory should be makes the write fail.
        std::fs::write(dir.path().join(id.as_str()), b"not a directory").unwrap();

        let result = store
            .save_chunk(&id, 0, &manifest(2, 4), Bytes::from_static(b"AA"))
            .await;
        assert!(matches!(result, Err(AppError::IoFailure(_))));
        assert!(!store.chunk_exists(&id, 0).await.unwrap());
        assert_eq!(store.completed_chunk_count(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ordered_chunks_ascending_and_restartable() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), Arc::new(MemoryChunkRepository::new())).await;
        let id = session_id(6);
        let manifest = manifest(3, 6);

        for (index, payload) in [(2, "CC"), (0, "AA"), (1, "BB")] {
            store
                .save_chunk(&id, index, &manifest, Bytes::from(payload))
                .await
                .unwrap();
        }

        let ordered = store.ordered_chunks(&id).await.unwrap();
        let indices: Vec<u32> = ordered.chunks().iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(ordered.total_size(), 6);

        for _ in 0..2 {
            let payloads: Vec<Bytes> = ordered
                .payloads()
                .map(|p| p.unwrap())
                .collect()
                .await;
            assert_eq!(payloads.concat(), b"AABBCC");
        }
    }

    #[tokio::test]
    async fn test_purge_removes_payloads_and_metadata() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), Arc::new(MemoryChunkRepository::new())).await;
        let id = session_id(7);
        let manifest = manifest(2, 4);

        store
            .save_chunk(&id, 0, &manifest, Bytes::from_static(b"AA"))
            .await
            .unwrap();
        store
            .save_chunk(&id, 1, &manifest, Bytes::from_static(b"BB"))
            .await
            .unwrap();

        let report = store.purge(&id).await;
        assert!(report.is_clean());
        assert_eq!(report.metadata_removed, 2);
        assert_eq!(report.payloads_removed, 2);
        assert!(!store.chunk_exists(&id, 0).await.unwrap());
        assert!(!dir.path().join(id.as_str()).exists());
    }

    #[tokio::test]
    async fn test_purge_failure_is_reported_as_event() {
        let dir = tempdir().unwrap();
        let repository = Arc::new(MemoryChunkRepository::new());
        let store = store(dir.path(), repository.clone()).await;
        let mut events = store.events.subscribe();
        let id = session_id(8);

        store
            .save_chunk(&id, 0, &manifest(1, 2), Bytes::from_static(b"AA"))
            .await
            .unwrap();
        repository.fail_next_delete();

        let report = store.purge(&id).await;
        assert!(!report.is_clean());

        match events.recv().await.unwrap() {
            UploadEvent::CleanupIncomplete { session_id, failures } => {
                assert_eq!(session_id, id);
                assert_eq!(failures.len(), 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_session_rejects_chunks() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), Arc::new(MemoryChunkRepository::new())).await;
        let id = session_id(9);
        let manifest = manifest(2, 4);

        store
            .save_chunk(&id, 0, &manifest, Bytes::from_static(b"AA"))
            .await
            .unwrap();
        store
            .mark(&id, SessionStatus::Cancelled, None)
            .await
            .unwrap();

        let result = store
            .save_chunk(&id, 1, &manifest, Bytes::from_static(b"BB"))
            .await;
        assert!(matches!(result, Err(AppError::SessionClosed(_))));
        assert_eq!(store.session_state(&id).await.unwrap(), SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_orphan_payloads_removed() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), Arc::new(MemoryChunkRepository::new())).await;

        let orphan = session_id(10);
        std::fs::create_dir_all(dir.path().join(orphan.as_str())).unwrap();
        std::fs::write(dir.path().join(payload_location(&orphan, 0)), b"AA").unwrap();

        let live = session_id(11);
        store
            .save_chunk(&live, 0, &manifest(1, 2), Bytes::from_static(b"AA"))
            .await
            .unwrap();

        assert_eq!(store.remove_orphan_payloads(Duration::ZERO).await.unwrap(), 1);
        assert!(!dir.path().join(orphan.as_str()).exists());
        assert!(dir.path().join(live.as_str()).exists());
    }

    #[tokio::test]
    async fn test_session_closed_during_write_leaves_no_chunk() {
        let dir = tempdir().unwrap();
        let repository = Arc::new(MemoryChunkRepository::new());
        let store = Arc::new(store(dir.path(), repository.clone()).await);
        let id = session_id(12);
        let manifest = manifest(2, 4);

        store
            .save_chunk(&id, 0, &manifest, Bytes::from_static(b"AA"))
            .await
            .unwrap();
        repository.delay_upserts_of(1, Duration::from_millis(200));

        let writer = {
            let store = store.clone();
            let id = id.clone();
            let manifest = manifest.clone();
            tokio::spawn(async move {
                store
                    .save_chunk(&id, 1, &manifest, Bytes::from_static(b"BB"))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        store
            .mark(&id, SessionStatus::Cancelled, None)
            .await
            .unwrap();
        store.purge(&id).await;

        let result = writer.await.unwrap();
        assert!(matches!(result, Err(AppError::SessionClosed(_))));
        assert!(!store.chunk_exists(&id, 1).await.unwrap());
        assert_eq!(store.completed_chunk_count(&id).await.unwrap(), 0);
        assert!(!dir.path().join(id.as_str()).exists());
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_one_index_keep_one_payload() {
        let dir = tempdir().unwrap();
        let repository = Arc::new(MemoryChunkRepository::new());
        let store = Arc::new(store(dir.path(), repository.clone()).await);
        let id = session_id(13);
        let manifest = manifest(2, 8);
        let payloads: Vec<Bytes> = (0..8u8).map(|n| Bytes::from(vec![b'a' + n; 4])).collect();

        let writers: Vec<_> = payloads
            .iter()
            .cloned()
            .map(|payload| {
                let store = store.clone();
                let id = id.clone();
                let manifest = manifest.clone();
                tokio::spawn(async move { store.save_chunk(&id, 0, &manifest, payload).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        assert_eq!(store.completed_chunk_count(&id).await.unwrap(), 1);
        assert_eq!(repository.chunk_count(), 1);

        let stored = std::fs::read(dir.path().join(payload_location(&id, 0))).unwrap();
        assert!(payloads.iter().any(|p| p.as_ref() == stored.as_slice()));

        // Only the final payload remains; no temp files from the losing writers.
        let files = std::fs::read_dir(dir.path().join(id.as_str())).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_ensure_accepts_checks_recorded_session() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), Arc::new(MemoryChunkRepository::new())).await;
        let id = session_id(14);

        store.ensure_accepts(&id, &manifest(2, 4)).await.unwrap();
        store
            .save_chunk(&id, 0, &manifest(2, 4), Bytes::from_static(b"AA"))
            .await
            .unwrap();

        assert!(matches!(
            store.ensure_accepts(&id, &manifest(2, 999)).await,
            Err(AppError::InvalidRequest(_))
        ));
    }
}
