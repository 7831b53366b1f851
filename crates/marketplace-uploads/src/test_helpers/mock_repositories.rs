//! Mock repository implementations for testing
//!
//! These mocks allow testing the upload engine without database dependencies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketplace_core::{AppError, Chunk, SessionId, SessionManifest, SessionStatus, UploadSession};
use marketplace_db::ChunkMetadataRepository;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory chunk metadata repository
#[derive(Clone, Default)]
pub struct MemoryChunkRepository {
    sessions: Arc<Mutex<HashMap<SessionId, UploadSession>>>,
    chunks: Arc<Mutex<BTreeMap<(SessionId, u32), Chunk>>>,
    fail_next_delete: Arc<AtomicBool>,
    fail_next_mark: Arc<AtomicBool>,
    upsert_delays: Arc<Mutex<HashMap<u32, Duration>>>,
}

impl MemoryChunkRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `delete_chunks` call fail
    pub fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }

    /// Make the next `mark_session` call fail
    pub fn fail_next_mark(&self) {
        self.fail_next_mark.store(true, Ordering::SeqCst);
    }

    /// Hold every `upsert_chunk` for `chunk_index` for `delay` before it is applied,
    /// leaving a window where the payload is written but the record is not.
    pub fn delay_upserts_of(&self, chunk_index: u32, delay: Duration) {
        self.upsert_delays.lock().unwrap().insert(chunk_index, delay);
    }

    /// Backdate a session, as if nothing had touched it since `updated_at`
    pub fn set_updated_at(&self, session_id: &SessionId, updated_at: DateTime<Utc>) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.updated_at = updated_at;
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }
}

#[async_trait]
impl ChunkMetadataRepository for MemoryChunkRepository {
    async fn find_session(&self, session_id: &SessionId) -> Result<Option<UploadSession>, AppError> {
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    async fn register_session(
        &self,
        session_id: &SessionId,
        manifest: &SessionManifest,
    ) -> Result<UploadSession, AppError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .entry(session_id.clone())
            .or_insert_with(|| UploadSession {
                session_id: session_id.clone(),
                manifest: Some(manifest.clone()),
                status: SessionStatus::InProgress,
                artifact_url: None,
                created_at: now,
                updated_at: now,
            });
        Ok(session.clone())
    }

    async fn record_cancelled(&self, session_id: &SessionId) -> Result<UploadSession, AppError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .entry(session_id.clone())
            .or_insert_with(|| UploadSession {
                session_id: session_id.clone(),
                manifest: None,
                status: SessionStatus::Cancelled,
                artifact_url: None,
                created_at: now,
                updated_at: now,
            });
        Ok(session.clone())
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), AppError> {
        let delay = self
            .upsert_delays
            .lock()
            .unwrap()
            .get(&chunk.chunk_index)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // The sessions lock is held across the status check and the insert, like the
        // row lock in the Postgres repository.
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&chunk.session_id).ok_or_else(|| {
            AppError::NotFound(format!("Upload session {} not found", chunk.session_id))
        })?;
        ensure_in_progress(session)?;
        session.updated_at = Utc::now();

        self.chunks
            .lock()
            .unwrap()
            .insert((chunk.session_id.clone(), chunk.chunk_index), chunk.clone());
        Ok(())
    }

    async fn find_chunk(
        &self,
        session_id: &SessionId,
        chunk_index: u32,
    ) -> Result<Option<Chunk>, AppError> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .get(&(session_id.clone(), chunk_index))
            .cloned())
    }

    async fn list_chunks(&self, session_id: &SessionId) -> Result<Vec<Chunk>, AppError> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .values()
            .filter(|chunk| &chunk.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn received_indices(&self, session_id: &SessionId) -> Result<BTreeSet<u32>, AppError> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _)| id == session_id)
            .map(|(_, index)| *index)
            .collect())
    }

    async fn mark_session(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
        artifact_url: Option<&str>,
    ) -> Result<(), AppError> {
        if self.fail_next_mark.swap(false, Ordering::SeqCst) {
            return Err(AppError::Internal("injected mark failure".to_string()));
        }

        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(session_id).ok_or_else(|| {
            AppError::NotFound(format!("Upload session {} not found", session_id))
        })?;
        ensure_in_progress(session)?;
        session.status = status;
        if let Some(url) = artifact_url {
            session.artifact_url = Some(url.to_string());
        }
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_chunks(&self, session_id: &SessionId) -> Result<u64, AppError> {
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(AppError::Internal("injected delete failure".to_string()));
        }

        let mut chunks = self.chunks.lock().unwrap();
        let before = chunks.len();
        chunks.retain(|(id, _), _| id != session_id);
        Ok((before - chunks.len()) as u64)
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<bool, AppError> {
        self.chunks
            .lock()
            .unwrap()
            .retain(|(id, _), _| id != session_id);
        Ok(self.sessions.lock().unwrap().remove(session_id).is_some())
    }

    async fn find_stale_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UploadSession>, AppError> {
        let mut stale: Vec<UploadSession> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|session| session.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|session| session.updated_at);
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }
}

fn ensure_in_progress(session: &UploadSession) -> Result<(), AppError> {
    if session.status != SessionStatus::InProgress {
        return Err(AppError::SessionClosed(format!(
            "Upload {} is {}",
            session.session_id, session.status
        )));
    }
    Ok(())
}
