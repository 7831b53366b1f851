use crate::error::HttpAppError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use marketplace_core::AppError;

/// Identity of an authenticated caller, stored in request extensions by the auth gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    /// Leading characters of the presented API key, safe to log
    pub key_prefix: String,
}

// Extracted from request parts so it works alongside Multipart
impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerContext>()
            .cloned()
            .ok_or_else(|| {
                HttpAppError(AppError::Unauthorized(
                    "Missing caller identity".to_string(),
                ))
            })
    }
}
