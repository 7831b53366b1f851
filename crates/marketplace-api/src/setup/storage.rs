//! Storage setup and initialization

use anyhow::{Context, Result};
use marketplace_core::Config;
use marketplace_storage::{create_storage, Storage};
use std::sync::Arc;

/// Build the durable object store for assembled artifacts.
pub async fn setup_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    tracing::info!("Initializing artifact storage...");
    let storage = create_storage(config)
        .await
        .context("Failed to initialize artifact storage")?;
    tracing::info!(
        backend = %storage.backend_type(),
        "Artifact storage initialized successfully"
    );
    Ok(storage)
}
