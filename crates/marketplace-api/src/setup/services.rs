//! Upload engine and background task initialization

use crate::state::AppState;
use anyhow::{Context, Result};
use marketplace_core::Config;
use marketplace_db::UploadChunkRepository;
use marketplace_storage::Storage;
use marketplace_uploads::{EngineConfig, UploadEngine, UploadEvent};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

/// Build the upload engine on Postgres metadata and start its background tasks.
pub async fn initialize_services(
    config: &Config,
    pool: PgPool,
    storage: Arc<dyn Storage>,
) -> Result<Arc<AppState>> {
    let repository = Arc::new(UploadChunkRepository::new(pool.clone()));
    let engine_config = EngineConfig::from_config(config);

    tracing::info!(
        chunk_root = %engine_config.chunk_root.display(),
        assembly_temp_dir = %engine_config.assembly_temp_dir.display(),
        max_chunk_size = engine_config.max_chunk_size,
        max_total_chunks = engine_config.max_total_chunks,
        "Initializing upload engine..."
    );
    let engine = Arc::new(
        UploadEngine::new(repository, storage.clone(), engine_config)
            .await
            .context("Failed to initialize upload engine")?,
    );

    spawn_event_listener(engine.subscribe());

    match config.sweep_interval() {
        Some(every) => {
            Arc::new(engine.sweeper()).start(every);
            tracing::info!(
                interval_secs = every.as_secs(),
                ttl_secs = config.session_ttl().as_secs(),
                "Started abandoned upload sweeper"
            );
        }
        None => tracing::warn!("Abandoned upload sweeper disabled (SWEEP_INTERVAL_SECS=0)"),
    }

    Ok(Arc::new(AppState {
        engine,
        storage,
        pool: Some(pool),
    }))
}

/// Log engine events that no request reports back to a client.
fn spawn_event_listener(mut events: broadcast::Receiver<UploadEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(UploadEvent::Assembled {
                    session_id,
                    artifact_url,
                    size_bytes,
                }) => {
                    tracing::debug!(
                        session_id = %session_id,
                        artifact_url = %artifact_url,
                        size_bytes,
                        "Upload event: assembled"
                    );
                }
                Ok(UploadEvent::CleanupIncomplete {
                    session_id,
                    failures,
                }) => {
                    tracing::warn!(
                        session_id = %session_id,
                        failures = failures.len(),
                        "Upload event: cleanup left data behind; the sweeper will retry"
                    );
                }
                Ok(UploadEvent::SessionExpired { session_id, status }) => {
                    tracing::debug!(
                        session_id = %session_id,
                        status = %status,
                        "Upload event: session expired"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Upload event listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
