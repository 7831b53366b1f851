//! Assembler
//!
//! Concatenates a session's chunks in ascending index order into a temp file, hands the
//! result to the durable object store and closes the session. Any failure before the
//! session is marked completed leaves every chunk in place so `complete` can be retried.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use marketplace_core::{AppError, SessionId, SessionManifest, SessionStatus};
use marketplace_storage::{ByteReader, Storage};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::chunk_store::{ChunkStore, OrderedChunks};
use crate::events::{EventBus, UploadEvent};
use crate::locks::KeyedLocks;

pub struct Assembler {
    store: Arc<ChunkStore>,
    storage: Arc<dyn Storage>,
    temp_dir: PathBuf,
    locks: Arc<KeyedLocks<SessionId>>,
    events: EventBus,
}

impl Assembler {
    pub async fn new(
        store: Arc<ChunkStore>,
        storage: Arc<dyn Storage>,
        temp_dir: PathBuf,
        locks: Arc<KeyedLocks<SessionId>>,
        events: EventBus,
    ) -> Result<Self, AppError> {
        fs::create_dir_all(&temp_dir).await.map_err(|e| {
            AppError::IoFailure(format!(
                "Failed to create assembly directory {}: {}",
                temp_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            store,
            storage,
            temp_dir,
            locks,
            events,
        })
    }

    /// Assemble `session_id` into one artifact stored under `folder` and return its URL.
    ///
    /// Only one assembly per session runs at a time; a concurrent call fails fast with
    /// `AssemblyInProgress`. Calling again after success returns the stored URL.
    #[tracing::instrument(skip_all, fields(session_id = %session_id, folder = %folder))]
    pub async fn assemble(&self, session_id: &SessionId, folder: &str) -> Result<String, AppError> {
        let _guard = self.locks.try_lock(session_id.clone()).ok_or_else(|| {
            AppError::AssemblyInProgress(format!(
                "Upload {} is already being assembled",
                session_id
            ))
        })?;

        // Nothing recorded yet: no chunk has arrived, and the expected count is unknown.
        let Some(session) = self.store.find_session(session_id).await? else {
            return Err(AppError::IncompleteUpload {
                received: 0,
                expected: 0,
                missing: Vec::new(),
            });
        };

        match session.status {
            SessionStatus::Completed => {
                if let Some(url) = session.artifact_url {
                    tracing::debug!("Upload already assembled");
                    return Ok(url);
                }
            }
            SessionStatus::Cancelled => {
                return Err(AppError::SessionClosed(format!(
                    "Upload {} was cancelled",
                    session_id
                )));
            }
            SessionStatus::InProgress => {}
        }

        let manifest = session.manifest.ok_or_else(|| {
            AppError::Internal(format!("Upload {} has no recorded manifest", session_id))
        })?;
        let received = self.store.received_indices(session_id).await?;
        let missing = manifest.missing_indices(&received);
        if !missing.is_empty() {
            return Err(AppError::IncompleteUpload {
                received: manifest.total_chunks as usize - missing.len(),
                expected: manifest.total_chunks,
                missing,
            });
        }

        let start = std::time::Instant::now();
        let (url, size_bytes) = self.assemble_and_store(session_id, &manifest, folder).await?;

        if let Err(e) = self
            .store
            .mark(session_id, SessionStatus::Completed, Some(&url))
            .await
        {
            // Nothing points at the stored object unless completion is recorded.
            if let Err(delete_err) = self.storage.delete(&url).await {
                tracing::error!(
                    url = %url,
                    error = %delete_err,
                    "Failed to delete artifact after completion could not be recorded"
                );
            }
            return Err(match e {
                // Cancelled while assembling.
                AppError::SessionClosed(_) => e,
                e => AppError::assembly("Failed to record completed upload", e),
            });
        }

        let report = self.store.purge(session_id).await;

        tracing::info!(
            url = %url,
            size_bytes,
            chunks = manifest.total_chunks,
            purge_clean = report.is_clean(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Upload assembled"
        );

        self.events.publish(UploadEvent::Assembled {
            session_id: session_id.clone(),
            artifact_url: url.clone(),
            size_bytes,
        });

        Ok(url)
    }

    async fn assemble_and_store(
        &self,
        session_id: &SessionId,
        manifest: &SessionManifest,
        folder: &str,
    ) -> Result<(String, u64), AppError> {
        let ordered = self.store.ordered_chunks(session_id).await?;
        let expected = ordered.total_size();
        if expected != manifest.total_file_size {
            return Err(AppError::SizeMismatch {
                expected: manifest.total_file_size,
                actual: expected,
            });
        }

        // Removed on drop, whatever happens below.
        let temp = tempfile::Builder::new()
            .prefix(&format!("{}-", session_id))
            .suffix(".assembling")
            .tempfile_in(&self.temp_dir)
            .map_err(|e| AppError::assembly("Failed to create temp artifact", e))?;

        let written = concatenate(&ordered, temp.path())
            .await
            .map_err(|e| AppError::assembly("Failed to concatenate chunks", e))?;
        if written != expected {
            return Err(AppError::SizeMismatch {
                expected,
                actual: written,
            });
        }

        let file = fs::File::open(temp.path())
            .await
            .map_err(|e| AppError::assembly("Failed to reopen temp artifact", e))?;
        let reader: ByteReader = Box::pin(file);

        let url = self
            .storage
            .store_stream(
                folder,
                &manifest.file_name,
                &manifest.content_type,
                Some(written),
                reader,
            )
            .await
            .map_err(|e| AppError::assembly("Failed to store assembled artifact", e))?;

        Ok((url, written))
    }
}

async fn concatenate(ordered: &OrderedChunks, path: &Path) -> Result<u64, AppError> {
    let mut file = fs::OpenOptions::new().write(true).open(path).await?;
    let mut written = 0u64;

    let mut payloads = Box::pin(ordered.payloads());
    while let Some(payload) = payloads.next().await {
        let payload = payload?;
        file.write_all(&payload).await?;
        written += payload.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkStoreConfig;
    use crate::test_helpers::{manifest, session_id, MemoryChunkRepository, MockStorage};
    use bytes::Bytes;
    use marketplace_core::ErrorMetadata;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        repository: Arc<MemoryChunkRepository>,
        storage: Arc<MockStorage>,
        store: Arc<ChunkStore>,
        assembler: Arc<Assembler>,
    }

    async fn fixture(storage: MockStorage) -> Fixture {
        let dir = tempdir().unwrap();
        let repository = Arc::new(MemoryChunkRepository::new());
        let storage = Arc::new(storage);
        let events = EventBus::default();
        let store = Arc::new(
            ChunkStore::new(
                repository.clone(),
                ChunkStoreConfig {
                    root: dir.path().join("chunks"),
                    max_chunk_size: 1024,
                    max_total_chunks: 100,
                },
                events.clone(),
            )
            .await
            .unwrap(),
        );
        let assembler = Arc::new(
            Assembler::new(
                store.clone(),
                storage.clone(),
                dir.path().join("assembly"),
                Arc::new(KeyedLocks::new()),
                events,
            )
            .await
            .unwrap(),
        );
        Fixture {
            dir,
            repository,
            storage,
            store,
            assembler,
        }
    }

    async fn upload(store: &ChunkStore, id: &SessionId, chunks: &[(u32, &'static str)]) {
        let total_size = chunks.iter().map(|(_, p)| p.len() as u64).sum();
        let manifest = manifest(3, total_size);
        for (index, payload) in chunks {
            store
                .save_chunk(id, *index, &manifest, Bytes::from(*payload))
                .await
                .unwrap();
        }
    }

    fn temp_files(f: &Fixture) -> usize {
        std::fs::read_dir(f.dir.path().join("assembly"))
            .unwrap()
            .count()
    }

    #[tokio::test]
    async fn test_assembles_in_index_order() {
        let f = fixture(MockStorage::new()).await;
        let id = session_id(1);
        upload(&f.store, &id, &[(2, "CC"), (0, "AA"), (1, "BB")]).await;

        let url = f.assembler.assemble(&id, "products").await.unwrap();

        assert_eq!(f.storage.object(&url).unwrap(), b"AABBCC");
        assert_eq!(temp_files(&f), 0);
    }

    #[tokio::test]
    async fn test_chunks_gone_after_success() {
        let f = fixture(MockStorage::new()).await;
        let id = session_id(2);
        upload(&f.store, &id, &[(0, "AA"), (1, "BB"), (2, "CC")]).await;

        f.assembler.assemble(&id, "products").await.unwrap();

        for index in 0..3 {
            assert!(!f.store.chunk_exists(&id, index).await.unwrap());
        }
        assert_eq!(f.repository.chunk_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_middle_chunk_is_incomplete() {
        let f = fixture(MockStorage::new()).await;
        let id = session_id(3);
        let manifest = manifest(3, 6);
        for (index, payload) in [(0u32, "AA"), (2, "CC")] {
            f.store
                .save_chunk(&id, index, &manifest, Bytes::from(payload))
                .await
                .unwrap();
        }

        let result = f.assembler.assemble(&id, "products").await;
        match result {
            Err(AppError::IncompleteUpload {
                received,
                expected,
                missing,
            }) => {
                assert_eq!(received, 2);
                assert_eq!(expected, 3);
                assert_eq!(missing, vec![1]);
            }
            other => panic!("expected IncompleteUpload, got {:?}", other),
        }

        assert!(f.store.chunk_exists(&id, 0).await.unwrap());
        assert!(f.store.chunk_exists(&id, 2).await.unwrap());
        assert_eq!(f.storage.store_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_session_is_incomplete() {
        let f = fixture(MockStorage::new()).await;
        let err = f
            .assembler
            .assemble(&session_id(4), "products")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IncompleteUpload { .. }));
        assert_eq!(err.client_message(), "Upload incomplete: no chunks received yet");
    }

    #[tokio::test]
    async fn test_declared_size_mismatch() {
        let f = fixture(MockStorage::new()).await;
        let id = session_id(5);
        let manifest = manifest(3, 10);
        for (index, payload) in [(0u32, "AA"), (1, "BB"), (2, "CC")] {
            f.store
                .save_chunk(&id, index, &manifest, Bytes::from(payload))
                .await
                .unwrap();
        }

        let result = f.assembler.assemble(&id, "products").await;
        assert!(matches!(
            result,
            Err(AppError::SizeMismatch {
                expected: 10,
                actual: 6
            })
        ));
        assert_eq!(f.storage.store_calls(), 0);
        assert_eq!(f.repository.chunk_count(), 3);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_chunks_for_retry() {
        let f = fixture(MockStorage::new()).await;
        let id = session_id(6);
        upload(&f.store, &id, &[(0, "AA"), (1, "BB"), (2, "CC")]).await;

        f.storage.fail_next_store();
        let result = f.assembler.assemble(&id, "products").await;
        assert!(matches!(result, Err(AppError::AssemblyFailure { .. })));
        assert_eq!(f.repository.chunk_count(), 3);
        assert_eq!(temp_files(&f), 0);

        let url = f.assembler.assemble(&id, "products").await.unwrap();
        assert_eq!(f.storage.object(&url).unwrap(), b"AABBCC");
    }

    #[tokio::test]
    async fn test_missing_payload_file_is_assembly_failure() {
        let f = fixture(MockStorage::new()).await;
        let id = session_id(7);
        upload(&f.store, &id, &[(0, "AA"), (1, "BB"), (2, "CC")]).await;

        let chunk_dir = f.dir.path().join("chunks").join(id.as_str());
        std::fs::remove_file(chunk_dir.join("00000001.part")).unwrap();

        let result = f.assembler.assemble(&id, "products").await;
        assert!(matches!(result, Err(AppError::AssemblyFailure { .. })));
        assert_eq!(f.storage.store_calls(), 0);
        assert!(f.store.chunk_exists(&id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_completion_record_deletes_artifact() {
        let f = fixture(MockStorage::new()).await;
        let id = session_id(8);
        upload(&f.store, &id, &[(0, "AA"), (1, "BB"), (2, "CC")]).await;

        f.repository.fail_next_mark();
        let result = f.assembler.assemble(&id, "products").await;

        assert!(matches!(result, Err(AppError::AssemblyFailure { .. })));
        assert_eq!(f.storage.delete_calls(), 1);
        assert_eq!(f.storage.object_count(), 0);
        assert_eq!(f.repository.chunk_count(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_complete_stores_once() {
        let f = fixture(MockStorage::new().with_delay(Duration::from_millis(100))).await;
        let id = session_id(9);
        upload(&f.store, &id, &[(0, "AA"), (1, "BB"), (2, "CC")]).await;

        let first = {
            let assembler = f.assembler.clone();
            let id = id.clone();
            tokio::spawn(async move { assembler.assemble(&id, "products").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = f.assembler.assemble(&id, "products").await;

        assert!(matches!(second, Err(AppError::AssemblyInProgress(_))));
        let url = first.await.unwrap().unwrap();
        assert_eq!(f.storage.store_calls(), 1);

        // A retry after success returns the same artifact without storing again.
        let again = f.assembler.assemble(&id, "products").await.unwrap();
        assert_eq!(again, url);
        assert_eq!(f.storage.store_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_session_cannot_assemble() {
        let f = fixture(MockStorage::new()).await;
        let id = session_id(10);
        upload(&f.store, &id, &[(0, "AA"), (1, "BB"), (2, "CC")]).await;
        f.store
            .mark(&id, SessionStatus::Cancelled, None)
            .await
            .unwrap();

        let result = f.assembler.assemble(&id, "products").await;
        assert!(matches!(result, Err(AppError::SessionClosed(_))));
    }

    #[tokio::test]
    async fn test_cancel_during_assembly_discards_artifact() {
        let f = fixture(MockStorage::new().with_delay(Duration::from_millis(100))).await;
        let id = session_id(11);
        upload(&f.store, &id, &[(0, "AA"), (1, "BB"), (2, "CC")]).await;

        let assembly = {
            let assembler = f.assembler.clone();
            let id = id.clone();
            tokio::spawn(async move { assembler.assemble(&id, "products").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.store
            .mark(&id, SessionStatus::Cancelled, None)
            .await
            .unwrap();

        let result = assembly.await.unwrap();
        assert!(matches!(result, Err(AppError::SessionClosed(_))));
        assert_eq!(f.storage.delete_calls(), 1);
        assert_eq!(f.storage.object_count(), 0);
    }
}
