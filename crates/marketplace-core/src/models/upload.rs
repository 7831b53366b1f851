use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::AppError;

/// Length of the hex-encoded session id (128 bits).
pub const SESSION_ID_HEX_LEN: usize = 32;

/// Opaque upload session token: 128 random bits, lowercase hex.
///
/// Parsing only accepts the canonical shape, so a `SessionId` is always safe to use as a
/// path component or storage key segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        SessionId(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SessionId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            AppError::InvalidRequest(format!(
                "Invalid upload ID: expected {} hex characters",
                SESSION_ID_HEX_LEN
            ))
        };

        let bytes: [u8; 16] = hex::decode(s.trim())
            .map_err(|_| invalid())?
            .try_into()
            .map_err(|_| invalid())?;
        Ok(SessionId::from_bytes(bytes))
    }
}

impl TryFrom<String> for SessionId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

/// Client-declared description of the file, carried redundantly on every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub file_name: String,
    pub content_type: String,
    pub total_file_size: u64,
    pub total_chunks: u32,
}

impl SessionManifest {
    /// Reject manifests whose declared shape can never assemble.
    pub fn validate(&self, max_total_chunks: u32) -> Result<(), AppError> {
        if self.total_chunks == 0 {
            return Err(AppError::InvalidRequest(
                "totalChunks must be greater than 0".to_string(),
            ));
        }
        if self.total_chunks > max_total_chunks {
            return Err(AppError::InvalidRequest(format!(
                "totalChunks {} exceeds maximum {}; use a larger chunk size",
                self.total_chunks, max_total_chunks
            )));
        }
        if self.file_name.trim().is_empty() || self.file_name.len() > 255 {
            return Err(AppError::InvalidRequest(
                "fileName must be between 1 and 255 characters".to_string(),
            ));
        }
        if self.content_type.trim().is_empty() || self.content_type.len() > 255 {
            return Err(AppError::InvalidRequest(
                "contentType must be between 1 and 255 characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Describe the first field where `other` disagrees with this manifest.
    pub fn conflict_with(&self, other: &SessionManifest) -> Option<String> {
        if self.total_chunks != other.total_chunks {
            return Some(format!(
                "totalChunks {} does not match {} recorded for this upload",
                other.total_chunks, self.total_chunks
            ));
        }
        if self.total_file_size != other.total_file_size {
            return Some(format!(
                "totalFileSize {} does not match {} recorded for this upload",
                other.total_file_size, self.total_file_size
            ));
        }
        if self.file_name != other.file_name {
            return Some("fileName does not match the one recorded for this upload".to_string());
        }
        if self.content_type != other.content_type {
            return Some(
                "contentType does not match the one recorded for this upload".to_string(),
            );
        }
        None
    }

    /// Indices in `0..total_chunks` that are not in `received`.
    pub fn missing_indices(&self, received: &BTreeSet<u32>) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|index| !received.contains(index))
            .collect()
    }
}

/// Persisted lifecycle status of a session manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(AppError::Internal(format!(
                "Unknown upload session status: {}",
                other
            ))),
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// One logical file transfer as recorded by the chunk store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: SessionId,
    /// `None` only for a session cancelled before its first chunk arrived.
    pub manifest: Option<SessionManifest>,
    pub status: SessionStatus,
    /// Set once the assembled artifact has been stored.
    pub artifact_url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Last chunk write or status change; drives abandoned-session expiry.
    pub updated_at: DateTime<Utc>,
}

/// One persisted slice of the file. `chunk_index` is 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub session_id: SessionId,
    pub chunk_index: u32,
    pub payload_size: u64,
    /// Opaque reference into the chunk payload medium.
    pub payload_location: String,
    pub received_at: DateTime<Utc>,
    /// True once the payload is durably written.
    pub completed: bool,
}

/// Observable state of an upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Id issued, nothing persisted yet.
    Initialized,
    /// Manifest recorded; holds the set of received chunk indices.
    InProgress(BTreeSet<u32>),
    Completed { artifact_url: String },
    Cancelled,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Initialized => "initialized",
            SessionState::InProgress(_) => "in_progress",
            SessionState::Completed { .. } => "completed",
            SessionState::Cancelled => "cancelled",
        }
    }
}
