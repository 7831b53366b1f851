//! OpenAPI documentation, served at `crate::constants::OPENAPI_PATH`.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error;
use crate::handlers;

/// Registers the bearer API key scheme referenced by the upload endpoints.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Marketplace Upload API",
        version = "0.1.0",
        description = "Chunked upload and assembly of large digital goods. Files are sent as independently transmitted chunks, then assembled into the durable object store."
    ),
    paths(
        handlers::chunked_upload::init_upload,
        handlers::chunked_upload::upload_chunk,
        handlers::chunked_upload::complete_upload,
        handlers::chunked_upload::get_progress,
        handlers::chunked_upload::cancel_upload,
        handlers::health::health_check,
    ),
    components(
        schemas(
            handlers::chunked_upload::InitUploadRequest,
            handlers::chunked_upload::InitUploadResponse,
            handlers::chunked_upload::ChunkUploadForm,
            handlers::chunked_upload::ChunkUploadResponse,
            handlers::chunked_upload::CompleteUploadRequest,
            handlers::chunked_upload::CompleteUploadResponse,
            handlers::chunked_upload::ProgressResponse,
            handlers::chunked_upload::CancelUploadResponse,
            handlers::health::HealthCheckResponse,
            error::ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "uploads", description = "Chunked upload sessions: init, chunk, progress, complete, cancel"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub fn get_openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_upload_routes() {
        let spec = get_openapi_spec();
        for path in [
            "/api/upload/init",
            "/api/upload/chunk",
            "/api/upload/complete",
            "/api/upload/progress/{uploadId}",
            "/api/upload/cancel/{uploadId}",
            "/health",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {}", path);
        }
        let components = spec.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
