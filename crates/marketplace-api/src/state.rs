//! Application state shared by handlers.

use marketplace_storage::Storage;
use marketplace_uploads::UploadEngine;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<UploadEngine>,
    /// Artifact store the engine writes to.
    pub storage: Arc<dyn Storage>,
    /// `None` when metadata lives outside Postgres (tests use an in-memory repository).
    pub pool: Option<PgPool>,
}
