//! API constants

/// Prefix of every upload route
pub const API_PREFIX: &str = "/api/upload";

/// Path of the generated OpenAPI document
pub const OPENAPI_PATH: &str = "/api/openapi.json";

/// Headroom on top of the maximum chunk size for multipart framing and text fields.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;
