//! Configuration module
//!
//! This module provides configuration structures for the upload API and the chunked
//! upload engine: server, database, authentication, object storage and engine limits.

use std::env;
use std::time::Duration;

use crate::storage_types::StorageBackend;

// Common constants
const SERVER_PORT: u16 = 4000;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MIN_API_KEY_LEN: usize = 32;
const CHUNK_SIZE_BYTES: u64 = 1024 * 1024;
const MAX_CHUNK_SIZE_MB: u64 = 16;
const MAX_TOTAL_CHUNKS: u32 = 10_000;
const SESSION_TTL_SECS: u64 = 24 * 60 * 60;
const SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Server-level configuration
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub cors_origins: Vec<String>,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    /// Bearer tokens accepted by the authentication gate.
    pub api_keys: Vec<String>,
    /// "json" for structured log lines, anything else for human-readable output.
    pub log_format: String,
}

/// Chunked upload engine and object storage configuration
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub storage_backend: StorageBackend,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers.
    pub s3_endpoint: Option<String>,
    /// Directory holding in-flight chunk payloads.
    pub chunk_storage_path: String,
    /// Directory for temporary assembled artifacts.
    pub assembly_temp_path: String,
    /// Chunk size suggested to clients by `init`; not enforced.
    pub chunk_size_bytes: u64,
    /// Upper bound for a single chunk payload.
    pub max_chunk_size_bytes: u64,
    pub max_total_chunks: u32,
    /// Sessions idle longer than this are purged by the sweeper.
    pub session_ttl_secs: u64,
    /// 0 disables the sweeper.
    pub sweep_interval_secs: u64,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub base: BaseConfig,
    pub uploads: UploadConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api_keys: Vec<String> = env::var("API_KEYS")
            .map_err(|_| anyhow::anyhow!("API_KEYS must be set for authentication"))?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            cors_origins,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            api_keys,
            log_format: env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "text".to_string())
                .to_lowercase(),
        };

        let storage_backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse::<StorageBackend>()?,
            Err(_) => StorageBackend::Local,
        };

        let uploads = UploadConfig {
            storage_backend,
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            chunk_storage_path: env::var("CHUNK_STORAGE_PATH")
                .unwrap_or_else(|_| "temp/uploads/chunks".to_string()),
            assembly_temp_path: env::var("ASSEMBLY_TEMP_PATH")
                .unwrap_or_else(|_| "temp/uploads/assembly".to_string()),
            chunk_size_bytes: env::var("CHUNK_SIZE_BYTES")
                .unwrap_or_else(|_| CHUNK_SIZE_BYTES.to_string())
                .parse()
                .unwrap_or(CHUNK_SIZE_BYTES),
            max_chunk_size_bytes: env::var("MAX_CHUNK_SIZE_MB")
                .unwrap_or_else(|_| MAX_CHUNK_SIZE_MB.to_string())
                .parse::<u64>()
                .unwrap_or(MAX_CHUNK_SIZE_MB)
                * 1024
                * 1024,
            max_total_chunks: env::var("MAX_TOTAL_CHUNKS")
                .unwrap_or_else(|_| MAX_TOTAL_CHUNKS.to_string())
                .parse()
                .unwrap_or(MAX_TOTAL_CHUNKS),
            session_ttl_secs: env::var("SESSION_TTL_SECS")
                .unwrap_or_else(|_| SESSION_TTL_SECS.to_string())
                .parse()
                .unwrap_or(SESSION_TTL_SECS),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| SWEEP_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(SWEEP_INTERVAL_SECS),
        };

        let config = Config { base, uploads };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.base.api_keys.is_empty() {
            return Err(anyhow::anyhow!("API_KEYS must contain at least one key"));
        }
        if self
            .base
            .api_keys
            .iter()
            .any(|key| key.len() < MIN_API_KEY_LEN)
        {
            return Err(anyhow::anyhow!(
                "Every API key must be at least {} characters long",
                MIN_API_KEY_LEN
            ));
        }

        if !self.base.database_url.starts_with("postgres://")
            && !self.base.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.is_production() && self.base.cors_origins.iter().any(|o| o == "*") {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let uploads = &self.uploads;
        if uploads.chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!("CHUNK_SIZE_BYTES must be greater than 0"));
        }
        if uploads.chunk_size_bytes > uploads.max_chunk_size_bytes {
            return Err(anyhow::anyhow!(
                "CHUNK_SIZE_BYTES ({}) cannot exceed MAX_CHUNK_SIZE_MB ({} bytes)",
                uploads.chunk_size_bytes,
                uploads.max_chunk_size_bytes
            ));
        }
        if uploads.max_total_chunks == 0 {
            return Err(anyhow::anyhow!("MAX_TOTAL_CHUNKS must be greater than 0"));
        }
        if uploads.session_ttl_secs == 0 {
            return Err(anyhow::anyhow!("SESSION_TTL_SECS must be greater than 0"));
        }

        match uploads.storage_backend {
            StorageBackend::Local => {
                if uploads.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if uploads.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
            StorageBackend::S3 => {
                if uploads.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if uploads.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
        }

        Ok(())
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    // Convenience getters for common fields
    pub fn server_port(&self) -> u16 {
        self.base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.base.environment
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.base.cors_origins
    }

    pub fn database_url(&self) -> &str {
        &self.base.database_url
    }

    pub fn db_max_connections(&self) -> u32 {
        self.base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.base.db_timeout_seconds
    }

    pub fn api_keys(&self) -> &[String] {
        &self.base.api_keys
    }

    pub fn log_format(&self) -> &str {
        &self.base.log_format
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.uploads.storage_backend
    }

    pub fn local_storage_path(&self) -> Option<&str> {
        self.uploads.local_storage_path.as_deref()
    }

    pub fn local_storage_base_url(&self) -> Option<&str> {
        self.uploads.local_storage_base_url.as_deref()
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.uploads.s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.uploads.s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.uploads.s3_endpoint.as_deref()
    }

    pub fn chunk_storage_path(&self) -> &str {
        &self.uploads.chunk_storage_path
    }

    pub fn assembly_temp_path(&self) -> &str {
        &self.uploads.assembly_temp_path
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.uploads.chunk_size_bytes
    }

    pub fn max_chunk_size_bytes(&self) -> u64 {
        self.uploads.max_chunk_size_bytes
    }

    pub fn max_total_chunks(&self) -> u32 {
        self.uploads.max_total_chunks
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.uploads.session_ttl_secs)
    }

    /// `None` when the sweeper is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.uploads.sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            base: BaseConfig {
                server_port: 4000,
                environment: "development".to_string(),
                cors_origins: vec!["*".to_string()],
                database_url: "postgresql://localhost/marketplace".to_string(),
                db_max_connections: 5,
                db_timeout_seconds: 5,
                api_keys: vec!["k".repeat(32)],
                log_format: "text".to_string(),
            },
            uploads: UploadConfig {
                storage_backend: StorageBackend::Local,
                local_storage_path: Some("/tmp/marketplace".to_string()),
                local_storage_base_url: Some("http://localhost:4000/files".to_string()),
                s3_bucket: None,
                s3_region: None,
                s3_endpoint: None,
                chunk_storage_path: "/tmp/chunks".to_string(),
                assembly_temp_path: "/tmp/assembly".to_string(),
                chunk_size_bytes: CHUNK_SIZE_BYTES,
                max_chunk_size_bytes: MAX_CHUNK_SIZE_MB * 1024 * 1024,
                max_total_chunks: MAX_TOTAL_CHUNKS,
                session_ttl_secs: SESSION_TTL_SECS,
                sweep_interval_secs: 0,
            },
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let config = valid_config();
        assert!(config.validate().is_ok());
        assert!(config.sweep_interval().is_none());
        assert_eq!(config.session_ttl(), Duration::from_secs(SESSION_TTL_SECS));
    }

    #[test]
    fn test_short_api_key_rejected() {
        let mut config = valid_config();
        config.base.api_keys = vec!["short".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wildcard_cors_rejected_in_production() {
        let mut config = valid_config();
        config.base.environment = "production".to_string();
        assert!(config.is_production());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_backend_requires_paths() {
        let mut config = valid_config();
        config.uploads.local_storage_base_url = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_s3_backend_requires_bucket_and_region() {
        let mut config = valid_config();
        config.uploads.storage_backend = StorageBackend::S3;
        assert!(config.validate().is_err());

        config.uploads.s3_bucket = Some("marketplace-artifacts".to_string());
        config.uploads.s3_region = Some("eu-west-1".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_suggested_chunk_size_must_fit_limit() {
        let mut config = valid_config();
        config.uploads.chunk_size_bytes = config.uploads.max_chunk_size_bytes + 1;
        assert!(config.validate().is_err());
    }
}
