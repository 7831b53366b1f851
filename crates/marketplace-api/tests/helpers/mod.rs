//! Test helpers: build AppState and router for integration tests.
//!
//! Metadata lives in the in-memory repository and artifacts in `MockStorage`, so these
//! tests need no database. Run with `cargo test -p marketplace-api`.

#![allow(dead_code)]

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use marketplace_api::constants;
use marketplace_api::setup::routes;
use marketplace_api::state::AppState;
use marketplace_core::config::{BaseConfig, UploadConfig};
use marketplace_core::{Config, StorageBackend};
use marketplace_uploads::test_helpers::{MemoryChunkRepository, MockStorage};
use marketplace_uploads::{EngineConfig, UploadEngine};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// API key accepted by the test server.
pub const TEST_API_KEY: &str = "test-api-key-at-least-32-characters-long";

/// Largest chunk payload the test server accepts.
pub const TEST_MAX_CHUNK_SIZE: u64 = 1024 * 1024;

/// Upload route path (e.g. `/api/upload/init`).
pub fn api_path(path: &str) -> String {
    format!("{}{}", constants::API_PREFIX, path)
}

pub fn bearer() -> String {
    format!("Bearer {}", TEST_API_KEY)
}

/// Test application: server plus the doubles behind it.
pub struct TestApp {
    pub server: TestServer,
    pub repository: Arc<MemoryChunkRepository>,
    pub storage: Arc<MockStorage>,
    pub engine: Arc<UploadEngine>,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

fn create_test_config(temp_dir: &TempDir) -> Config {
    let path = |name: &str| temp_dir.path().join(name).to_string_lossy().into_owned();

    Config {
        base: BaseConfig {
            server_port: 0,
            environment: "test".to_string(),
            cors_origins: vec!["*".to_string()],
            database_url: "postgresql://unused/marketplace".to_string(),
            db_max_connections: 1,
            db_timeout_seconds: 1,
            api_keys: vec![TEST_API_KEY.to_string()],
            log_format: "text".to_string(),
        },
        uploads: UploadConfig {
            storage_backend: StorageBackend::Local,
            local_storage_path: Some(path("artifacts")),
            local_storage_base_url: Some("http://localhost:4000/files".to_string()),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            chunk_storage_path: path("chunks"),
            assembly_temp_path: path("assembly"),
            chunk_size_bytes: 2,
            max_chunk_size_bytes: TEST_MAX_CHUNK_SIZE,
            max_total_chunks: 100,
            session_ttl_secs: 3600,
            sweep_interval_secs: 0,
        },
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with_storage(MockStorage::new()).await
}

/// Setup test app around `storage`, e.g. one built with `MockStorage::with_delay`.
pub async fn setup_test_app_with_storage(storage: MockStorage) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = create_test_config(&temp_dir);
    config.validate().expect("Test config must be valid");

    let repository = Arc::new(MemoryChunkRepository::new());
    let storage = Arc::new(storage);
    let engine = Arc::new(
        UploadEngine::new(
            repository.clone(),
            storage.clone(),
            EngineConfig::from_config(&config),
        )
        .await
        .expect("Failed to create upload engine"),
    );

    let state = Arc::new(AppState {
        engine: engine.clone(),
        storage: storage.clone(),
        pool: None,
    });
    let router = routes::setup_routes(&config, state).expect("Failed to build routes");
    let server = TestServer::new(router).expect("Failed to start test server");

    TestApp {
        server,
        repository,
        storage,
        engine,
        _temp_dir: temp_dir,
    }
}

/// Manifest values used by [`chunk_form`]
pub struct Upload<'a> {
    pub upload_id: &'a str,
    pub total_chunks: u32,
    pub total_file_size: u64,
}

/// Multipart body for chunk `index` of `upload`.
pub fn chunk_form(upload: &Upload<'_>, index: u32, payload: &[u8]) -> MultipartForm {
    MultipartForm::new()
        .add_text("uploadId", upload.upload_id)
        .add_text("chunkNumber", index)
        .add_text("totalChunks", upload.total_chunks)
        .add_text("fileName", "bundle.zip")
        .add_text("contentType", "application/zip")
        .add_text("totalFileSize", upload.total_file_size)
        .add_part(
            "chunk",
            Part::bytes(payload.to_vec())
                .file_name("blob")
                .mime_type("application/octet-stream"),
        )
}

/// Call `init` and return the new upload id.
pub async fn init_upload(client: &TestServer, total_chunks: u32, file_size: u64) -> String {
    let response = client
        .post(&api_path("/init"))
        .add_header("Authorization", bearer())
        .json(&serde_json::json!({
            "fileName": "bundle.zip",
            "fileSize": file_size,
            "contentType": "application/zip",
            "totalChunks": total_chunks,
        }))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    let body: serde_json::Value = response.json();
    body["uploadId"]
        .as_str()
        .expect("uploadId in init response")
        .to_string()
}

/// Upload chunk `index` and return the JSON response body.
pub async fn send_chunk(
    client: &TestServer,
    upload: &Upload<'_>,
    index: u32,
    payload: &[u8],
) -> serde_json::Value {
    let response = client
        .post(&api_path("/chunk"))
        .add_header("Authorization", bearer())
        .multipart(chunk_form(upload, index, payload))
        .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    response.json()
}

/// Latency injected into stores by concurrency tests
pub const SLOW_STORE: Duration = Duration::from_millis(200);
