//! File management module for assetvault.
//!
//! This module provides the per-project file hierarchy:
//! - Directory tree with materialized file paths
//! - Two-phase uploads (pending, then confirmed) against an owner quota
//! - Presigned URL delegation to object storage
//! - Background purge of abandoned uploads

mod directory;
mod path;
mod quota;
mod reaper;
mod record;
mod remote;
mod storage;
mod tags;
mod tree;
mod upload;

use std::sync::Arc;

pub use directory::{Directory, DirectoryRepository};
pub use path::{
    join_path, numbered_name, sanitize_file_name, split_extension, storage_key,
    validate_directory_name,
};
pub use quota::QuotaUsage;
pub use reaper::{start_reaper, PendingReaper, SweepReport};
pub use record::{
    DirectoryScope, FileFilter, FileRecord, FileRepository, FileStatus, NewFileRecord, TagMatch,
};
pub use remote::ObjectStoreGateway;
pub use storage::{MemoryStorage, StorageGateway};
pub use tags::{normalize_tags, validate_tags};
pub use tree::DirectoryService;
pub use upload::{DownloadTicket, UploadPolicy, UploadRequest, UploadService, UploadTicket};

use crate::config::StorageConfig;
use crate::{Result, VaultError};

/// Maximum length for file and directory names (in characters).
pub const MAX_NAME_LENGTH: usize = 255;

/// Default maximum upload size (50MB, inclusive).
pub const MAX_FILE_SIZE: i64 = 50 * 1024 * 1024;

/// Content types accepted for upload by default.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
];

/// Maximum number of tags per file.
pub const MAX_TAGS: usize = 20;

/// Maximum length for a tag (in characters).
pub const MAX_TAG_LENGTH: usize = 50;

/// Base name used when sanitization leaves nothing.
pub const DEFAULT_FILE_BASE: &str = "file";

/// Build the storage gateway selected by configuration.
pub fn gateway_from_config(config: &StorageConfig) -> Result<Arc<dyn StorageGateway>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        "s3" => Ok(Arc::new(ObjectStoreGateway::from_config(config)?)),
        other => Err(VaultError::Config(format!(
            "unsupported storage backend: {other}"
        ))),
    }
}
