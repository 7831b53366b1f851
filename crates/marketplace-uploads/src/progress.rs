//! Progress Tracker
//!
//! Completion is decided by the set of received indices inside `[0, total_chunks)`, not by
//! a raw count, so a stray or duplicated index can never make an upload look complete.

use std::sync::Arc;

use marketplace_core::{AppError, SessionId, SessionState};

use crate::chunk_store::ChunkStore;

/// Upload progress as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Integer percentage in `[0, 100]`
    pub percent: u8,
    pub completed: bool,
    pub received_chunks: usize,
}

pub struct ProgressTracker {
    store: Arc<ChunkStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<ChunkStore>) -> Self {
        Self { store }
    }

    /// Progress of `session_id` towards `total_chunks` chunks.
    ///
    /// Completed sessions report 100%. Cancelled sessions fail with `SessionClosed`.
    pub async fn progress(
        &self,
        session_id: &SessionId,
        total_chunks: i64,
    ) -> Result<Progress, AppError> {
        let total = validate_total(total_chunks)?;

        match self.store.session_state(session_id).await? {
            SessionState::Initialized => Ok(compute(0, total)),
            SessionState::InProgress(received) => {
                self.ensure_matches_manifest(session_id, total).await?;
                let in_range = received.range(0..total).count();
                Ok(compute(in_range, total))
            }
            SessionState::Completed { .. } => {
                self.ensure_matches_manifest(session_id, total).await?;
                Ok(compute(total as usize, total))
            }
            SessionState::Cancelled => Err(AppError::SessionClosed(format!(
                "Upload {} was cancelled",
                session_id
            ))),
        }
    }

    pub async fn is_complete(
        &self,
        session_id: &SessionId,
        total_chunks: i64,
    ) -> Result<bool, AppError> {
        Ok(self.progress(session_id, total_chunks).await?.completed)
    }

    async fn ensure_matches_manifest(
        &self,
        session_id: &SessionId,
        total: u32,
    ) -> Result<(), AppError> {
        let recorded = self
            .store
            .find_session(session_id)
            .await?
            .and_then(|session| session.manifest);
        if let Some(manifest) = recorded {
            if manifest.total_chunks != total {
                return Err(AppError::InvalidRequest(format!(
                    "totalChunks {} does not match {} recorded for this upload",
                    total, manifest.total_chunks
                )));
            }
        }
        Ok(())
    }
}

fn validate_total(total_chunks: i64) -> Result<u32, AppError> {
    if total_chunks <= 0 {
        return Err(AppError::InvalidRequest(
            "totalChunks must be greater than 0".to_string(),
        ));
    }
    u32::try_from(total_chunks)
        .map_err(|_| AppError::InvalidRequest(format!("totalChunks {} is too large", total_chunks)))
}

fn compute(received_in_range: usize, total: u32) -> Progress {
    let percent = (received_in_range as u64 * 100 / total as u64) as u8;
    Progress {
        percent,
        completed: received_in_range == total as usize,
        received_chunks: received_in_range,
    }
}
