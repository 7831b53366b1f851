use crate::auth::models::CallerContext;
use crate::error::HttpAppError;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use marketplace_core::AppError;
use std::sync::Arc;
use subtle::ConstantTimeEq;

const BEARER_PREFIX: &str = "Bearer ";
const KEY_PREFIX_LEN: usize = 8;

#[derive(Clone)]
pub struct AuthState {
    pub api_keys: Vec<String>,
}

impl AuthState {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    /// Compares against every configured key so timing does not reveal which one matched.
    fn is_valid(&self, token: &str) -> bool {
        self.api_keys
            .iter()
            .fold(false, |matched, key| matched | secure_compare(token, key))
    }
}

fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn key_prefix(token: &str) -> String {
    token.chars().take(KEY_PREFIX_LEN).collect()
}

fn unauthorized(message: &str) -> Response {
    HttpAppError(AppError::Unauthorized(message.to_string())).into_response()
}

/// Rejects the request with 401 unless it carries `Authorization: Bearer <api key>`.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        Some(h) => h,
        None => {
            tracing::debug!("Rejected request without authorization header");
            return unauthorized("Missing authorization header");
        }
    };

    let Some(token) = auth_header.strip_prefix(BEARER_PREFIX) else {
        tracing::debug!("Rejected request with non-bearer authorization");
        return unauthorized("Invalid authorization header format");
    };

    if !auth_state.is_valid(token) {
        tracing::warn!(key_prefix = %key_prefix(token), "Rejected invalid API key");
        return unauthorized("Invalid API key");
    }

    let caller_key_prefix = key_prefix(token);
    request.extensions_mut().insert(CallerContext {
        key_prefix: caller_key_prefix,
    });
    next.run(request).await
}
