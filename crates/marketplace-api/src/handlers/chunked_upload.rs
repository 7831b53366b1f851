//! Chunked upload handlers for large digital goods.
//!
//! A client calls `init`, sends every chunk as a multipart request, polls `progress`, then
//! calls `complete` to assemble the file into the durable object store. `cancel` abandons
//! the upload and purges its chunks.

use crate::auth::models::CallerContext;
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::multipart::{Field, MultipartRejection},
    extract::rejection::QueryRejection,
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use marketplace_core::{AppError, SessionId, SessionManifest};
use marketplace_storage::normalize_folder;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use utoipa::ToSchema;

const MAX_FOLDER_LEN: usize = 255;

/// Request to open an upload session
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    /// Original filename
    pub file_name: String,
    /// Total file size in bytes
    pub file_size: u64,
    /// Content type (MIME type)
    pub content_type: String,
    /// Number of chunks the client will send
    pub total_chunks: u32,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: String,
    /// Suggested chunk size in bytes; the final chunk may be shorter
    pub chunk_size: u64,
    /// Always "initialized"
    pub status: String,
}

/// Multipart body of a chunk upload (documentation only)
#[allow(dead_code)]
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadForm {
    pub upload_id: String,
    /// 0-based chunk index
    pub chunk_number: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub content_type: String,
    pub total_file_size: u64,
    /// Raw chunk bytes
    #[schema(value_type = String, format = Binary)]
    pub chunk: Vec<u8>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    /// "chunk_exists", "chunk_uploaded" or "complete"
    pub status: String,
    pub chunk_number: u32,
    /// Integer percentage of received chunks
    pub progress: u8,
    pub upload_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub upload_id: String,
    /// Destination folder in the object store; empty for the root
    #[serde(default)]
    pub folder: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    /// Always "success"
    pub status: String,
    pub file_url: String,
    pub upload_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressQuery {
    pub total_chunks: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub upload_id: String,
    pub progress: u8,
    pub completed: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelUploadResponse {
    /// Always "cancelled"
    pub status: String,
    pub upload_id: String,
}

fn parse_upload_id(raw: &str) -> Result<SessionId, AppError> {
    raw.parse::<SessionId>()
}

/// Reject folders the object store would refuse, before any chunk is read.
fn validate_folder(folder: &str) -> Result<String, HttpAppError> {
    let trimmed = folder.trim();
    if trimmed.len() > MAX_FOLDER_LEN || trimmed.starts_with('/') {
        return Err(AppError::InvalidRequest(format!(
            "folder must be a relative path of at most {} characters",
            MAX_FOLDER_LEN
        ))
        .into());
    }
    Ok(normalize_folder(trimmed)?)
}

/// Open a chunked upload session
#[utoipa::path(
    post,
    path = "/api/upload/init",
    tag = "uploads",
    request_body = InitUploadRequest,
    responses(
        (status = 200, description = "Upload session opened", body = InitUploadResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn init_upload(
    caller: CallerContext,
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<InitUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let manifest = SessionManifest {
        file_name: request.file_name,
        content_type: request.content_type,
        total_file_size: request.file_size,
        total_chunks: request.total_chunks,
    };
    let session_id = state.engine.init(&manifest)?;

    tracing::info!(
        session_id = %session_id,
        caller = %caller.key_prefix,
        file_name = %manifest.file_name,
        file_size = manifest.total_file_size,
        total_chunks = manifest.total_chunks,
        "Started chunked upload session"
    );

    Ok(Json(InitUploadResponse {
        upload_id: session_id.to_string(),
        chunk_size: state.engine.suggested_chunk_size(),
        status: "initialized".to_string(),
    }))
}

/// Fields collected from a chunk upload form
#[derive(Default)]
struct ChunkFields {
    upload_id: Option<String>,
    chunk_number: Option<String>,
    total_chunks: Option<String>,
    file_name: Option<String>,
    content_type: Option<String>,
    total_file_size: Option<String>,
    chunk: Option<Bytes>,
}

impl ChunkFields {
    async fn read(mut multipart: Multipart) -> Result<Self, HttpAppError> {
        let mut fields = ChunkFields::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(|s| s.to_string()).unwrap_or_default();
            match name.as_str() {
                "chunk" => {
                    if fields.chunk.is_some() {
                        return Err(AppError::InvalidRequest(
                            "Multiple chunk fields are not allowed".to_string(),
                        )
                        .into());
                    }
                    fields.chunk = Some(field.bytes().await?);
                }
                "uploadId" => fields.upload_id = Some(text(field).await?),
                "chunkNumber" => fields.chunk_number = Some(text(field).await?),
                "totalChunks" => fields.total_chunks = Some(text(field).await?),
                "fileName" => fields.file_name = Some(text(field).await?),
                "contentType" => fields.content_type = Some(text(field).await?),
                "totalFileSize" => fields.total_file_size = Some(text(field).await?),
                other => {
                    tracing::debug!(field = %other, "Ignoring unknown multipart field");
                }
            }
        }

        Ok(fields)
    }
}

async fn text(field: Field<'_>) -> Result<String, HttpAppError> {
    Ok(field.text().await?)
}

fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value.ok_or_else(|| AppError::InvalidRequest(format!("Missing field: {}", name)))
}

fn parse_number<T: FromStr>(value: Option<String>, name: &str) -> Result<T, AppError> {
    required(value, name)?
        .trim()
        .parse::<T>()
        .map_err(|_| AppError::InvalidRequest(format!("{} must be a non-negative integer", name)))
}

/// Upload one chunk of a session
#[utoipa::path(
    post,
    path = "/api/upload/chunk",
    tag = "uploads",
    request_body(content = ChunkUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Chunk accepted", body = ChunkUploadResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 409, description = "Upload already completed or cancelled", body = ErrorResponse),
        (status = 413, description = "Chunk too large", body = ErrorResponse),
        (status = 500, description = "Chunk could not be persisted", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn upload_chunk(
    _caller: CallerContext,
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, HttpAppError> {
    let fields = ChunkFields::read(multipart?).await?;

    let session_id = parse_upload_id(&required(fields.upload_id, "uploadId")?)?;
    let chunk_number: u32 = parse_number(fields.chunk_number, "chunkNumber")?;
    let manifest = SessionManifest {
        file_name: required(fields.file_name, "fileName")?,
        content_type: required(fields.content_type, "contentType")?,
        total_file_size: parse_number(fields.total_file_size, "totalFileSize")?,
        total_chunks: parse_number(fields.total_chunks, "totalChunks")?,
    };
    let payload = fields
        .chunk
        .ok_or_else(|| AppError::InvalidRequest("Missing field: chunk".to_string()))?;

    let outcome = state
        .engine
        .upload_chunk(&session_id, chunk_number, &manifest, payload)
        .await?;

    Ok(Json(ChunkUploadResponse {
        status: outcome.status.as_str().to_string(),
        chunk_number: outcome.chunk_index,
        progress: outcome.progress.percent,
        upload_id: session_id.to_string(),
    }))
}

/// Assemble all chunks into the final file
#[utoipa::path(
    post,
    path = "/api/upload/complete",
    tag = "uploads",
    request_body = CompleteUploadRequest,
    responses(
        (status = 200, description = "File assembled and stored", body = CompleteUploadResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 409, description = "Chunks missing, assembly running, or upload cancelled", body = ErrorResponse),
        (status = 422, description = "Assembled size differs from the declared size", body = ErrorResponse),
        (status = 500, description = "Assembly failed; chunks kept for retry", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn complete_upload(
    caller: CallerContext,
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<CompleteUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session_id = parse_upload_id(&request.upload_id)?;
    let folder = validate_folder(&request.folder)?;

    let file_url = state.engine.complete(&session_id, &folder).await?;

    tracing::info!(
        session_id = %session_id,
        caller = %caller.key_prefix,
        file_url = %file_url,
        "Chunked upload completed"
    );

    Ok(Json(CompleteUploadResponse {
        status: "success".to_string(),
        file_url,
        upload_id: session_id.to_string(),
    }))
}

/// Report how many chunks of a session have arrived
#[utoipa::path(
    get,
    path = "/api/upload/progress/{uploadId}",
    tag = "uploads",
    params(
        ("uploadId" = String, Path, description = "Upload session ID"),
        ("totalChunks" = i64, Query, description = "Number of chunks the client is sending")
    ),
    responses(
        (status = 200, description = "Upload progress", body = ProgressResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 409, description = "Upload cancelled", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_progress(
    _caller: CallerContext,
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
    query: Result<Query<ProgressQuery>, QueryRejection>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session_id = parse_upload_id(&upload_id)?;
    let Query(query) = query?;
    let total_chunks = query.total_chunks.ok_or_else(|| {
        AppError::InvalidRequest("Missing query parameter: totalChunks".to_string())
    })?;

    let progress = state.engine.progress(&session_id, total_chunks).await?;

    Ok(Json(ProgressResponse {
        upload_id: session_id.to_string(),
        progress: progress.percent,
        completed: progress.completed,
    }))
}

/// Cancel an upload and discard its chunks
#[utoipa::path(
    delete,
    path = "/api/upload/cancel/{uploadId}",
    tag = "uploads",
    params(
        ("uploadId" = String, Path, description = "Upload session ID")
    ),
    responses(
        (status = 200, description = "Upload cancelled", body = CancelUploadResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 409, description = "Upload already completed", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn cancel_upload(
    caller: CallerContext,
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    let session_id = parse_upload_id(&upload_id)?;

    state.engine.cancel(&session_id).await?;

    tracing::info!(
        session_id = %session_id,
        caller = %caller.key_prefix,
        "Chunked upload cancelled by client"
    );

    Ok(Json(CancelUploadResponse {
        status: "cancelled".to_string(),
        upload_id: session_id.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_folder() {
        assert_eq!(validate_folder("").unwrap(), "");
        assert_eq!(validate_folder("products/2024/").unwrap(), "products/2024");
        assert!(validate_folder("../etc").is_err());
        assert!(validate_folder("a/../../b").is_err());
        assert!(validate_folder("/absolute").is_err());
        assert!(validate_folder("win\\path").is_err());
        assert!(validate_folder(&"x".repeat(MAX_FOLDER_LEN + 1)).is_err());
        assert!(validate_folder("a//b").is_err());
        assert!(validate_folder("a/./b").is_err());
        assert!(validate_folder("a/.hidden").is_ok());
    }

    #[test]
    fn test_parse_number_reports_field() {
        let err = parse_number::<u32>(Some("-1".to_string()), "chunkNumber").unwrap_err();
        assert!(err.to_string().contains("chunkNumber"));
        let err = parse_number::<u32>(None, "totalChunks").unwrap_err();
        assert!(err.to_string().contains("Missing field: totalChunks"));
        assert_eq!(parse_number::<u64>(Some(" 42 ".to_string()), "n").unwrap(), 42);
    }
}
