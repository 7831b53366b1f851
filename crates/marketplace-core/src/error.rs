//! Error types module
//!
//! This module provides the error taxonomy used throughout the upload engine.
//! All errors are unified under the `AppError` enum which can represent request
//! validation, persistence, storage and assembly failures.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Maximum number of missing chunk indices echoed back in an `IncompleteUpload` message.
const MAX_REPORTED_MISSING: usize = 20;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like races between clients
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
/// This trait allows errors to self-describe their HTTP response characteristics
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "INCOMPLETE_UPLOAD")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden from clients
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Chunk too large: {0}")]
    PayloadTooLarge(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("Upload incomplete: {received} of {expected} chunks received")]
    IncompleteUpload {
        received: usize,
        expected: u32,
        missing: Vec<u32>,
    },

    #[error("Size mismatch: expected {expected} bytes, assembled {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Assembly failed: {message}")]
    AssemblyFailure {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Assembly already in progress: {0}")]
    AssemblyInProgress(String),

    #[error("Upload session closed: {0}")]
    SessionClosed(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::IoFailure(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidRequest(format!("JSON parsing error: {}", err))
    }
}

impl AppError {
    /// Wrap any failure raised while assembling or storing an artifact.
    pub fn assembly(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        AppError::AssemblyFailure {
            message: message.into(),
            source: source.into(),
        }
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
/// client_message stays per-variant for dynamic content.
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Database(_) => (
            500,
            "DATABASE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::Storage(_) => (
            500,
            "STORAGE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InvalidRequest(_) => (
            400,
            "INVALID_REQUEST",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::Unauthorized(_) => (
            401,
            "UNAUTHORIZED",
            false,
            Some("Sign in or provide a valid API key"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the upload ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::PayloadTooLarge(_) => (
            413,
            "PAYLOAD_TOO_LARGE",
            false,
            Some("Split the file into smaller chunks"),
            false,
            LogLevel::Debug,
        ),
        AppError::IoFailure(_) => (
            500,
            "IO_FAILURE",
            true,
            Some("Retry the same request"),
            true,
            LogLevel::Error,
        ),
        AppError::IncompleteUpload { .. } => (
            409,
            "INCOMPLETE_UPLOAD",
            true,
            Some("Upload the missing chunks, then complete again"),
            false,
            LogLevel::Debug,
        ),
        AppError::SizeMismatch { .. } => (
            422,
            "SIZE_MISMATCH",
            false,
            Some("Cancel the upload and start over"),
            false,
            LogLevel::Warn,
        ),
        AppError::AssemblyFailure { .. } => (
            500,
            "ASSEMBLY_FAILURE",
            true,
            Some("Retry completion; uploaded chunks were kept"),
            true,
            LogLevel::Error,
        ),
        AppError::AssemblyInProgress(_) => (
            409,
            "ASSEMBLY_IN_PROGRESS",
            true,
            Some("Wait for the running completion to finish"),
            false,
            LogLevel::Warn,
        ),
        AppError::SessionClosed(_) => (
            409,
            "SESSION_CLOSED",
            false,
            Some("Start a new upload"),
            false,
            LogLevel::Debug,
        ),
        AppError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::InvalidRequest(_) => "InvalidRequest",
            AppError::Unauthorized(_) => "Unauthorized",
            AppError::NotFound(_) => "NotFound",
            AppError::PayloadTooLarge(_) => "PayloadTooLarge",
            AppError::IoFailure(_) => "IOFailure",
            AppError::IncompleteUpload { .. } => "IncompleteUpload",
            AppError::SizeMismatch { .. } => "SizeMismatch",
            AppError::AssemblyFailure { .. } => "AssemblyFailure",
            AppError::AssemblyInProgress(_) => "AssemblyInProgress",
            AppError::SessionClosed(_) => "SessionClosed",
            AppError::Internal(_) => "Internal",
            AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "Failed to access upload metadata".to_string(),
            AppError::Storage(_) => "Failed to access storage".to_string(),
            AppError::InvalidRequest(ref msg) => msg.clone(),
            AppError::Unauthorized(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::PayloadTooLarge(ref msg) => msg.clone(),
            AppError::IoFailure(_) => "Failed to persist upload data".to_string(),
            AppError::IncompleteUpload {
                received,
                expected,
                missing,
            } => {
                // No manifest recorded: the session has not received any chunk.
                if *expected == 0 {
                    return "Upload incomplete: no chunks received yet".to_string();
                }
                let shown: Vec<String> = missing
                    .iter()
                    .take(MAX_REPORTED_MISSING)
                    .map(|i| i.to_string())
                    .collect();
                let suffix = if missing.len() > MAX_REPORTED_MISSING {
                    ", ..."
                } else {
                    ""
                };
                format!(
                    "Upload incomplete: {} of {} chunks received (missing: {}{})",
                    received,
                    expected,
                    shown.join(", "),
                    suffix
                )
            }
            AppError::SizeMismatch { expected, actual } => format!(
                "Assembled file is {} bytes but {} bytes were declared",
                actual, expected
            ),
            AppError::AssemblyFailure { .. } => "Failed to assemble file".to_string(),
            AppError::AssemblyInProgress(ref msg) => msg.clone(),
            AppError::SessionClosed(ref msg) => msg.clone(),
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::InternalWithSource { .. } => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_database() {
        #[cfg(feature = "sqlx")]
        let err = AppError::from(sqlx::Error::PoolClosed);
        #[cfg(not(feature = "sqlx"))]
        let err = AppError::Database("pool closed".to_string());
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "DATABASE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access upload metadata");
        assert!(err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_incomplete_upload_lists_missing_indices() {
        let err = AppError::IncompleteUpload {
            received: 2,
            expected: 3,
            missing: vec![1],
        };
        assert_eq!(err.http_status_code(), 409);
        assert_eq!(err.error_code(), "INCOMPLETE_UPLOAD");
        assert!(err.is_recoverable());
        assert_eq!(
            err.client_message(),
            "Upload incomplete: 2 of 3 chunks received (missing: 1)"
        );
    }

    #[test]
    fn test_incomplete_upload_without_manifest() {
        let err = AppError::IncompleteUpload {
            received: 0,
            expected: 0,
            missing: Vec::new(),
        };
        assert_eq!(err.client_message(), "Upload incomplete: no chunks received yet");
    }

    #[test]
    fn test_incomplete_upload_truncates_long_missing_list() {
        let err = AppError::IncompleteUpload {
            received: 0,
            expected: 100,
            missing: (0..100).collect(),
        };
        let message = err.client_message();
        assert!(message.ends_with(", ...)"));
        assert!(message.contains("19"));
        assert!(!message.contains(" 20,"));
    }

    #[test]
    fn test_io_failure_hides_internal_text() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "/var/chunks denied");
        let err = AppError::from(io_err);
        assert_eq!(err.error_code(), "IO_FAILURE");
        assert_eq!(err.error_type(), "IOFailure");
        assert!(err.is_sensitive());
        assert!(!err.client_message().contains("/var/chunks"));
        assert!(err.detailed_message().contains("/var/chunks"));
    }

    #[test]
    fn test_assembly_failure_keeps_cause_in_chain() {
        let err = AppError::assembly(
            "store rejected artifact",
            anyhow::anyhow!("bucket unavailable"),
        );
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "ASSEMBLY_FAILURE");
        assert_eq!(err.client_message(), "Failed to assemble file");
        assert!(err.detailed_message().contains("Caused by: bucket unavailable"));
    }

    #[test]
    fn test_concurrency_and_size_errors() {
        let busy = AppError::AssemblyInProgress("busy".to_string());
        assert_eq!(busy.http_status_code(), 409);
        assert_eq!(busy.error_code(), "ASSEMBLY_IN_PROGRESS");
        assert_eq!(busy.log_level(), LogLevel::Warn);

        let size = AppError::SizeMismatch {
            expected: 10,
            actual: 8,
        };
        assert_eq!(size.http_status_code(), 422);
        assert!(size.client_message().contains("8 bytes"));
        assert!(!size.is_recoverable());
    }

    #[test]
    fn test_error_metadata_suggested_actions() {
        let err1 = AppError::Unauthorized("missing".to_string());
        assert_eq!(err1.http_status_code(), 401);
        assert_eq!(
            err1.suggested_action(),
            Some("Sign in or provide a valid API key")
        );

        let err2 = AppError::InvalidRequest("test".to_string());
        assert_eq!(
            err2.suggested_action(),
            Some("Check request parameters and try again")
        );
    }
}
