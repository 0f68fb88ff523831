//! Project access resolution.

use async_trait::async_trait;
use sqlx::SqliteConnection;

use crate::db::{ProjectRepository, ProjectRole};
use crate::{Result, VaultError};

/// Resolves what a user may do inside a project.
///
/// Checks run on the caller's connection so they see the same snapshot as
/// the transaction that follows.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Return the user's role in the project.
    ///
    /// Fails with `NotFound` when the project does not exist and with
    /// `Permission` when the user has no access to it.
    async fn require_access(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        project_id: i64,
    ) -> Result<ProjectRole>;
}

/// Access control backed by the `project_members` table.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemberAccess;

#[async_trait]
impl AccessControl for MemberAccess {
    async fn require_access(
        &self,
        conn: &mut SqliteConnection,
        user_id: i64,
        project_id: i64,
    ) -> Result<ProjectRole> {
        if ProjectRepository::get_by_id(&mut *conn, project_id)
            .await?
            .is_none()
        {
            return Err(VaultError::NotFound("project".to_string()));
        }

        ProjectRepository::member_role(conn, project_id, user_id)
            .await?
            .ok_or_else(|| {
                VaultError::Permission("you are not a member of this project".to_string())
            })
    }
}
