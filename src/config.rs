//! Configuration module for assetvault.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, VaultError};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/assetvault.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage backend ("memory" or "s3").
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// Bucket name (s3 backend).
    #[serde(default)]
    pub bucket: String,
    /// Region (s3 backend).
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible stores (e.g. MinIO).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Access key ID.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Secret access key.
    #[serde(default)]
    pub secret_access_key: Option<String>,
    /// Allow plain HTTP endpoints.
    #[serde(default)]
    pub allow_http: bool,
    /// Lifetime of presigned upload URLs in seconds.
    #[serde(default = "default_upload_url_expiry")]
    pub upload_url_expiry_secs: u64,
    /// Lifetime of presigned download URLs in seconds.
    #[serde(default = "default_download_url_expiry")]
    pub download_url_expiry_secs: u64,
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_upload_url_expiry() -> u64 {
    900 // 15 minutes
}

fn default_download_url_expiry() -> u64 {
    3600 // 1 hour
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            bucket: String::new(),
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            allow_http: false,
            upload_url_expiry_secs: default_upload_url_expiry(),
            download_url_expiry_secs: default_download_url_expiry(),
        }
    }
}

/// Upload policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadsConfig {
    /// Maximum upload size in bytes (inclusive).
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: i64,
    /// Content types accepted for upload.
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
    /// Maximum number of tags per file.
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
    /// Maximum length of a single tag (in characters).
    #[serde(default = "default_max_tag_length")]
    pub max_tag_length: usize,
}

fn default_max_file_size() -> i64 {
    crate::file::MAX_FILE_SIZE
}

fn default_allowed_content_types() -> Vec<String> {
    crate::file::ALLOWED_CONTENT_TYPES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_tags() -> usize {
    crate::file::MAX_TAGS
}

fn default_max_tag_length() -> usize {
    crate::file::MAX_TAG_LENGTH
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            allowed_content_types: default_allowed_content_types(),
            max_tags: default_max_tags(),
            max_tag_length: default_max_tag_length(),
        }
    }
}

/// Pending upload reaper configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    /// Whether the reaper runs.
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,
    /// Sweep interval in seconds.
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,
    /// Age in seconds after which a pending upload is purged.
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_secs: u64,
}

fn default_reaper_enabled() -> bool {
    true
}

fn default_reaper_interval() -> u64 {
    3600 // 1 hour
}

fn default_pending_timeout() -> u64 {
    86400 // 24 hours
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            interval_secs: default_reaper_interval(),
            pending_timeout_secs: default_pending_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/assetvault.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Object storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upload policy configuration.
    #[serde(default)]
    pub uploads: UploadsConfig,
    /// Reaper configuration.
    #[serde(default)]
    pub reaper: ReaperConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            VaultError::Config(format!(
                "failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| VaultError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work together.
    pub fn validate(&self) -> Result<()> {
        match self.storage.backend.as_str() {
            "memory" => {}
            "s3" => {
                if self.storage.bucket.is_empty() {
                    return Err(VaultError::Config(
                        "storage.bucket is required for the s3 backend".to_string(),
                    ));
                }
            }
            other => {
                return Err(VaultError::Config(format!(
                    "unsupported storage backend: {other}"
                )));
            }
        }

        if self.uploads.max_file_size_bytes <= 0 {
            return Err(VaultError::Config(
                "uploads.max_file_size_bytes must be positive".to_string(),
            ));
        }
        if self.reaper.interval_secs == 0 {
            return Err(VaultError::Config(
                "reaper.interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
