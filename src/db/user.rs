//! User model for assetvault.
//!
//! Users are owned by an external identity system; this crate only keeps
//! what it needs for quota accounting.

use serde::Serialize;

use crate::error::BYTES_PER_MB;

/// Default storage quota for new users, in megabytes.
pub const DEFAULT_QUOTA_MB: i64 = 1024;

/// User entity with storage accounting.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct User {
    /// Unique user ID.
    pub id: i64,
    /// Login username (unique).
    pub username: String,
    /// Storage quota in megabytes.
    pub storage_quota_mb: i64,
    /// Bytes used by confirmed files across every project this user owns.
    pub storage_used_bytes: i64,
    /// Account creation timestamp.
    pub created_at: String,
}

impl User {
    /// Quota expressed in bytes.
    pub fn quota_bytes(&self) -> i64 {
        self.storage_quota_mb.saturating_mul(BYTES_PER_MB)
    }

    /// Bytes still free, floored at zero.
    pub fn available_bytes(&self) -> i64 {
        (self.quota_bytes() - self.storage_used_bytes).max(0)
    }

    /// Whether `size` more bytes fit in the quota. Filling it exactly is allowed.
    pub fn can_store(&self, size: i64) -> bool {
        self.storage_used_bytes.saturating_add(size) <= self.quota_bytes()
    }
}

/// Data for creating a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Login username.
    pub username: String,
    /// Storage quota in megabytes.
    pub storage_quota_mb: i64,
}

impl NewUser {
    /// Create a new user with the default quota.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            storage_quota_mb: DEFAULT_QUOTA_MB,
        }
    }

    /// Set the storage quota in megabytes.
    pub fn with_quota_mb(mut self, quota_mb: i64) -> Self {
        self.storage_quota_mb = quota_mb;
        self
    }
}
