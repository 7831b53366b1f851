use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use marketplace_core::{AppError, SessionId};
use tokio::time::interval;

use crate::chunk_store::ChunkStore;
use crate::events::{EventBus, UploadEvent};
use crate::locks::KeyedLocks;

/// Sessions examined per database round trip
const SWEEP_BATCH_SIZE: i64 = 500;

/// Summary of one sweep run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    /// Stale sessions left alone because an assembly held their lock
    pub skipped: usize,
    pub incomplete_purges: usize,
    pub orphans_removed: usize,
}

/// Background task purging sessions nobody touched for longer than the TTL.
///
/// In-progress sessions lose their chunks and manifest; completed and cancelled
/// tombstones are dropped.
pub struct SessionSweeper {
    store: Arc<ChunkStore>,
    assembly_locks: Arc<KeyedLocks<SessionId>>,
    events: EventBus,
    ttl: Duration,
}

impl SessionSweeper {
    pub fn new(
        store: Arc<ChunkStore>,
        assembly_locks: Arc<KeyedLocks<SessionId>>,
        events: EventBus,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            assembly_locks,
            events,
            ttl,
        }
    }

    /// Start the background sweep running every `every`
    /// Returns a JoinHandle for graceful shutdown
    pub fn start(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval = interval(every);

            loop {
                sweep_interval.tick().await;

                tracing::debug!("Starting scheduled sweep of abandoned upload sessions");

                match self.sweep_once().await {
                    Ok(report) => tracing::info!(
                        expired = report.expired,
                        skipped = report.skipped,
                        incomplete_purges = report.incomplete_purges,
                        orphans_removed = report.orphans_removed,
                        "Upload session sweep completed"
                    ),
                    Err(e) => tracing::error!(error = %e, "Upload session sweep failed"),
                }
            }
        })
    }

    #[tracing::instrument(skip(self), fields(sweep.ttl_secs = self.ttl.as_secs()))]
    pub async fn sweep_once(&self) -> Result<SweepReport, AppError> {
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| AppError::Internal(format!("Session TTL out of range: {}", e)))?;
        let cutoff = Utc::now() - ttl;
        let mut report = SweepReport::default();

        loop {
            let stale = self.store.stale_sessions(cutoff, SWEEP_BATCH_SIZE).await?;
            let batch_len = stale.len();
            let mut progressed = false;

            for session in stale {
                let session_id = session.session_id;
                let Some(_guard) = self.assembly_locks.try_lock(session_id.clone()) else {
                    report.skipped += 1;
                    continue;
                };

                let purge = self.store.purge(&session_id).await;
                if !purge.is_clean() {
                    report.incomplete_purges += 1;
                }

                if let Err(e) = self.store.forget_session(&session_id).await {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "Failed to delete expired upload session"
                    );
                    continue;
                }

                tracing::info!(
                    session_id = %session_id,
                    status = %session.status,
                    last_update = %session.updated_at,
                    "Expired upload session purged"
                );
                self.events.publish(UploadEvent::SessionExpired {
                    session_id,
                    status: session.status,
                });
                report.expired += 1;
                progressed = true;
            }

            // Skipped or failing sessions would come back in the next batch forever.
            if (batch_len as i64) < SWEEP_BATCH_SIZE || !progressed {
                break;
            }
        }

        report.orphans_removed = self.store.remove_orphan_payloads(self.ttl).await?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkStoreConfig;
    use crate::test_helpers::{manifest, session_id, MemoryChunkRepository};
    use bytes::Bytes;
    use marketplace_core::SessionStatus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sweep_purges_only_stale_sessions() {
        let dir = tempdir().unwrap();
        let repository = Arc::new(MemoryChunkRepository::new());
        let events = EventBus::default();
        let mut subscriber = events.subscribe();
        let store = Arc::new(
            ChunkStore::new(
                repository.clone(),
                ChunkStoreConfig {
                    root: dir.path().to_path_buf(),
                    max_chunk_size: 1024,
                    max_total_chunks: 100,
                },
                events.clone(),
            )
            .await
            .unwrap(),
        );
        let locks = Arc::new(KeyedLocks::new());
        let sweeper = SessionSweeper::new(
            store.clone(),
            locks.clone(),
            events,
            Duration::from_secs(3600),
        );

        let stale = session_id(1);
        let fresh = session_id(2);
        let busy = session_id(3);
        for id in [&stale, &fresh, &busy] {
            store
                .save_chunk(id, 0, &manifest(2, 4), Bytes::from_static(b"AA"))
                .await
                .unwrap();
        }
        let long_ago = Utc::now() - chrono::Duration::hours(2);
        repository.set_updated_at(&stale, long_ago);
        repository.set_updated_at(&busy, long_ago);

        let _assembling = locks.try_lock(busy.clone()).unwrap();
        let report = sweeper.sweep_once().await.unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(report.skipped, 1);
        assert!(store.find_session(&stale).await.unwrap().is_none());
        assert!(!dir.path().join(stale.as_str()).exists());
        assert!(store.chunk_exists(&fresh, 0).await.unwrap());
        assert!(store.chunk_exists(&busy, 0).await.unwrap());

        assert_eq!(
            subscriber.recv().await.unwrap(),
            UploadEvent::SessionExpired {
                session_id: stale,
                status: SessionStatus::InProgress,
            }
        );
    }

    #[tokio::test]
    async fn test_sweep_drops_old_tombstones() {
        let dir = tempdir().unwrap();
        let repository = Arc::new(MemoryChunkRepository::new());
        let store = Arc::new(
            ChunkStore::new(
                repository.clone(),
                ChunkStoreConfig {
                    root: dir.path().to_path_buf(),
                    max_chunk_size: 1024,
                    max_total_chunks: 100,
                },
                EventBus::default(),
            )
            .await
            .unwrap(),
        );
        let sweeper = SessionSweeper::new(
            store.clone(),
            Arc::new(KeyedLocks::new()),
            EventBus::default(),
            Duration::from_secs(60),
        );

        let id = session_id(4);
        store
            .save_chunk(&id, 0, &manifest(1, 2), Bytes::from_static(b"AA"))
            .await
            .unwrap();
        store
            .mark(&id, SessionStatus::Completed, Some("mock://a"))
            .await
            .unwrap();
        store.purge(&id).await;
        repository.set_updated_at(&id, Utc::now() - chrono::Duration::minutes(5));

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(repository.session_count(), 0);
    }
}
