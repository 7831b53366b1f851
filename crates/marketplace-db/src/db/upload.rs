use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketplace_core::models::{Chunk, SessionId, SessionManifest, SessionStatus, UploadSession};
use marketplace_core::AppError;
use sqlx::PgPool;
use std::collections::BTreeSet;

use crate::upload_traits::ChunkMetadataRepository;

const SESSION_COLUMNS: &str = "session_id, file_name, content_type, total_file_size, \
     total_chunks, status, artifact_url, created_at, updated_at";

const CHUNK_COLUMNS: &str =
    "session_id, chunk_index, payload_size, payload_location, received_at, completed";

/// Repository for chunked upload sessions and their chunk records
#[derive(Clone)]
pub struct UploadChunkRepository {
    pool: PgPool,
}

impl UploadChunkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explain why a conditional write on `session_id` matched no in-progress row.
    async fn not_in_progress(&self, session_id: &SessionId) -> AppError {
        match self.find_session(session_id).await {
            Ok(Some(session)) => AppError::SessionClosed(format!(
                "Upload {} is {}",
                session_id, session.status
            )),
            Ok(None) => AppError::NotFound(format!("Upload session {} not found", session_id)),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl ChunkMetadataRepository for UploadChunkRepository {
    async fn find_session(&self, session_id: &SessionId) -> Result<Option<UploadSession>, AppError> {
        // Use dynamic SQLx queries to avoid requiring DATABASE_URL/sqlx prepare
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM upload_sessions WHERE session_id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(UploadSession::try_from).transpose()
    }

    async fn register_session(
        &self,
        session_id: &SessionId,
        manifest: &SessionManifest,
    ) -> Result<UploadSession, AppError> {
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                session_id, file_name, content_type, total_file_size, total_chunks, status
            )
            VALUES ($1, $2, $3, $4, $5, 'in_progress')
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(session_id.as_str())
        .bind(&manifest.file_name)
        .bind(&manifest.content_type)
        .bind(to_i64(manifest.total_file_size)?)
        .bind(to_i32(manifest.total_chunks)?)
        .execute(&self.pool)
        .await?;

        self.find_session(session_id).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "Upload session {} vanished right after registration",
                session_id
            ))
        })
    }

    async fn record_cancelled(&self, session_id: &SessionId) -> Result<UploadSession, AppError> {
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (session_id, status)
            VALUES ($1, 'cancelled')
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;

        self.find_session(session_id).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "Upload session {} vanished right after cancellation",
                session_id
            ))
        })
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        // Holds the session row lock until commit, so a concurrent status change either
        // waits for this chunk (and purges it) or is seen here and refuses it.
        let open: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE upload_sessions
            SET updated_at = NOW()
            WHERE session_id = $1 AND status = 'in_progress'
            RETURNING session_id
            "#,
        )
        .bind(chunk.session_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        if open.is_none() {
            tx.rollback().await?;
            return Err(self.not_in_progress(&chunk.session_id).await);
        }

        sqlx::query(
            r#"
            INSERT INTO upload_chunks (
                session_id, chunk_index, payload_size, payload_location, received_at, completed
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (session_id, chunk_index) DO UPDATE SET
                payload_size = EXCLUDED.payload_size,
                payload_location = EXCLUDED.payload_location,
                received_at = EXCLUDED.received_at,
                completed = EXCLUDED.completed
            "#,
        )
        .bind(chunk.session_id.as_str())
        .bind(to_i32(chunk.chunk_index)?)
        .bind(to_i64(chunk.payload_size)?)
        .bind(&chunk.payload_location)
        .bind(chunk.received_at)
        .bind(chunk.completed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn find_chunk(
        &self,
        session_id: &SessionId,
        chunk_index: u32,
    ) -> Result<Option<Chunk>, AppError> {
        let row = sqlx::query_as::<_, ChunkRow>(&format!(
            "SELECT {} FROM upload_chunks WHERE session_id = $1 AND chunk_index = $2",
            CHUNK_COLUMNS
        ))
        .bind(session_id.as_str())
        .bind(to_i32(chunk_index)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Chunk::try_from).transpose()
    }

    async fn list_chunks(&self, session_id: &SessionId) -> Result<Vec<Chunk>, AppError> {
        let rows = sqlx::query_as::<_, ChunkRow>(&format!(
            "SELECT {} FROM upload_chunks WHERE session_id = $1 ORDER BY chunk_index",
            CHUNK_COLUMNS
        ))
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Chunk::try_from).collect()
    }

    async fn received_indices(&self, session_id: &SessionId) -> Result<BTreeSet<u32>, AppError> {
        let indices: Vec<i32> = sqlx::query_scalar(
            r#"
            SELECT chunk_index
            FROM upload_chunks
            WHERE session_id = $1
            "#,
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        indices.into_iter().map(to_u32).collect()
    }

    async fn mark_session(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
        artifact_url: Option<&str>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = $2, artifact_url = COALESCE($3, artifact_url), updated_at = NOW()
            WHERE session_id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(session_id.as_str())
        .bind(status.as_str())
        .bind(artifact_url)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.not_in_progress(session_id).await);
        }

        Ok(())
    }

    async fn delete_chunks(&self, session_id: &SessionId) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM upload_chunks
            WHERE session_id = $1
            "#,
        )
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_session(&self, session_id: &SessionId) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM upload_sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_stale_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UploadSession>, AppError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM upload_sessions WHERE updated_at < $1 ORDER BY updated_at LIMIT $2",
            SESSION_COLUMNS
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UploadSession::try_from).collect()
    }
}

/// Upload session record
#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    file_name: Option<String>,
    content_type: Option<String>,
    total_file_size: Option<i64>,
    total_chunks: Option<i32>,
    status: String,
    artifact_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for UploadSession {
    type Error = AppError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let manifest = match (
            row.file_name,
            row.content_type,
            row.total_file_size,
            row.total_chunks,
        ) {
            (Some(file_name), Some(content_type), Some(total_file_size), Some(total_chunks)) => {
                Some(SessionManifest {
                    file_name,
                    content_type,
                    total_file_size: to_u64(total_file_size)?,
                    total_chunks: to_u32(total_chunks)?,
                })
            }
            (None, None, None, None) => None,
            _ => {
                return Err(AppError::Internal(format!(
                    "Partial manifest recorded for upload session {}",
                    row.session_id
                )))
            }
        };

        Ok(UploadSession {
            session_id: stored_session_id(row.session_id)?,
            manifest,
            status: row.status.parse()?,
            artifact_url: row.artifact_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Upload chunk record
#[derive(Debug, sqlx::FromRow)]
struct ChunkRow {
    session_id: String,
    chunk_index: i32,
    payload_size: i64,
    payload_location: String,
    received_at: DateTime<Utc>,
    completed: bool,
}

impl TryFrom<ChunkRow> for Chunk {
    type Error = AppError;

    fn try_from(row: ChunkRow) -> Result<Self, Self::Error> {
        Ok(Chunk {
            session_id: stored_session_id(row.session_id)?,
            chunk_index: to_u32(row.chunk_index)?,
            payload_size: to_u64(row.payload_size)?,
            payload_location: row.payload_location,
            received_at: row.received_at,
            completed: row.completed,
        })
    }
}

fn stored_session_id(raw: String) -> Result<SessionId, AppError> {
    raw.parse()
        .map_err(|_| AppError::Internal(format!("Malformed session id in database: {}", raw)))
}

fn to_i32(value: u32) -> Result<i32, AppError> {
    i32::try_from(value)
        .map_err(|_| AppError::InvalidRequest(format!("Value {} is out of range", value)))
}

fn to_i64(value: u64) -> Result<i64, AppError> {
    i64::try_from(value)
        .map_err(|_| AppError::InvalidRequest(format!("Value {} is out of range", value)))
}

fn to_u32(value: i32) -> Result<u32, AppError> {
    u32::try_from(value)
        .map_err(|_| AppError::Internal(format!("Negative value {} in database", value)))
}

fn to_u64(value: i64) -> Result<u64, AppError> {
    u64::try_from(value)
        .map_err(|_| AppError::Internal(format!("Negative value {} in database", value)))
}
