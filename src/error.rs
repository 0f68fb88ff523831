//! Error types for assetvault.

use thiserror::Error;

use crate::file::Directory;

/// Number of bytes in one megabyte, as used for quota accounting.
pub const BYTES_PER_MB: i64 = 1024 * 1024;

/// Format a byte count as megabytes with two decimals (e.g. `2.00MB`).
pub fn format_mb(bytes: i64) -> String {
    format!("{:.2}MB", bytes as f64 / BYTES_PER_MB as f64)
}

fn mb(bytes: &i64) -> String {
    format_mb(*bytes)
}

/// Both sides of a directory name collision on a non-merge move.
#[derive(Debug, Clone)]
pub struct DirectoryConflict {
    /// The directory being moved.
    pub moving: Directory,
    /// The directory already occupying the name at the destination.
    pub existing: Directory,
}

impl std::fmt::Display for DirectoryConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "a directory named '{}' already exists at the destination (existing id {})",
            self.existing.name, self.existing.id
        )
    }
}

/// Common error type for assetvault.
#[derive(Error, Debug)]
pub enum VaultError {
    /// Database error.
    ///
    /// Database errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller's project role does not allow the operation.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// A name or path is already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A directory with the same name exists at the move destination.
    #[error("{0}")]
    DirectoryConflict(Box<DirectoryConflict>),

    /// The project owner's storage quota cannot hold the upload.
    #[error(
        "storage quota exceeded. Available: {}, Required: {}",
        mb(.available_bytes),
        mb(.required_bytes)
    )]
    QuotaExceeded {
        /// Bytes still free, floored at zero.
        available_bytes: i64,
        /// Bytes the upload needs.
        required_bytes: i64,
    },

    /// Object storage gateway failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for VaultError {
    fn from(e: sqlx::Error) -> Self {
        VaultError::Database(e.to_string())
    }
}

impl From<object_store::Error> for VaultError {
    fn from(e: object_store::Error) -> Self {
        VaultError::Storage(e.to_string())
    }
}

/// Result type alias for assetvault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
