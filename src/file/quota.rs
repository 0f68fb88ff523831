//! Storage quota accounting against a project owner.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::db::{ProjectRepository, User, UserRepository};
use crate::{Result, VaultError};

/// Snapshot of a project owner's storage usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    /// The quota owner.
    pub owner_id: i64,
    /// Quota in bytes.
    pub quota_bytes: i64,
    /// Bytes used by confirmed files.
    pub used_bytes: i64,
    /// Bytes still free, floored at zero.
    pub available_bytes: i64,
}

impl From<&User> for QuotaUsage {
    fn from(user: &User) -> Self {
        Self {
            owner_id: user.id,
            quota_bytes: user.quota_bytes(),
            used_bytes: user.storage_used_bytes,
            available_bytes: user.available_bytes(),
        }
    }
}

/// Resolve the quota owner of a project.
pub async fn owner_of(conn: &mut SqliteConnection, project_id: i64) -> Result<User> {
    ProjectRepository::owner(conn, project_id)
        .await?
        .ok_or_else(|| VaultError::NotFound("project owner".to_string()))
}

/// Fail with `QuotaExceeded` unless `size` more bytes fit.
pub async fn check_quota(conn: &mut SqliteConnection, project_id: i64, size: i64) -> Result<User> {
    let owner = owner_of(conn, project_id).await?;
    if !owner.can_store(size) {
        return Err(VaultError::QuotaExceeded {
            available_bytes: owner.available_bytes(),
            required_bytes: size,
        });
    }
    Ok(owner)
}

/// Charge confirmed bytes to the project owner.
pub async fn charge(conn: &mut SqliteConnection, project_id: i64, size: i64) -> Result<()> {
    let owner = owner_of(&mut *conn, project_id).await?;
    UserRepository::add_used_bytes(conn, owner.id, size).await?;
    debug!("Charged {} bytes to user {}", size, owner.id);
    Ok(())
}

/// Release bytes of a removed confirmed file. A project without an owner
/// has nothing to release.
pub async fn release(conn: &mut SqliteConnection, project_id: i64, size: i64) -> Result<()> {
    if let Some(owner) = ProjectRepository::owner(&mut *conn, project_id).await? {
        UserRepository::release_used_bytes(conn, owner.id, size).await?;
        debug!("Released {} bytes from user {}", size, owner.id);
    }
    Ok(())
}

/// Current usage of a project's owner.
pub async fn usage(conn: &mut SqliteConnection, project_id: i64) -> Result<QuotaUsage> {
    let owner = owner_of(conn, project_id).await?;
    Ok(QuotaUsage::from(&owner))
}
