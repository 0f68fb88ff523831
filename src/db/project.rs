//! Project and membership model for assetvault.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sqlx::SqliteConnection;

use super::user::User;
use crate::{Result, VaultError};

/// A member's role within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    /// Read-only access.
    #[default]
    Viewer = 0,
    /// Can upload, rename, move and tag.
    Editor = 1,
    /// Can additionally delete files and directories.
    Admin = 2,
    /// Project owner; their quota backs every upload in the project.
    Owner = 3,
}

impl ProjectRole {
    /// Convert role to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectRole::Viewer => "viewer",
            ProjectRole::Editor => "editor",
            ProjectRole::Admin => "admin",
            ProjectRole::Owner => "owner",
        }
    }

    /// Whether the role may create and modify content.
    pub fn can_modify(&self) -> bool {
        *self >= ProjectRole::Editor
    }

    /// Whether the role may delete content.
    pub fn can_delete(&self) -> bool {
        *self >= ProjectRole::Admin
    }

    /// Whether the role may manage members and settings.
    pub fn can_manage(&self) -> bool {
        *self >= ProjectRole::Admin
    }
}

impl fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProjectRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "viewer" => Ok(ProjectRole::Viewer),
            "editor" => Ok(ProjectRole::Editor),
            "admin" => Ok(ProjectRole::Admin),
            "owner" => Ok(ProjectRole::Owner),
            _ => Err(format!("unknown project role: {s}")),
        }
    }
}

impl TryFrom<String> for ProjectRole {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

/// A project owning a directory tree and files.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct Project {
    /// Unique project ID.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// When the project was created.
    pub created_at: String,
}

/// Repository for projects and memberships.
pub struct ProjectRepository;

impl ProjectRepository {
    /// Create a project and register its owner.
    pub async fn create(conn: &mut SqliteConnection, name: &str, owner_id: i64) -> Result<Project> {
        let id: i64 = sqlx::query_scalar("INSERT INTO projects (name) VALUES (?) RETURNING id")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;

        Self::add_member(conn, id, owner_id, ProjectRole::Owner).await?;

        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| VaultError::NotFound("project".to_string()))
    }

    /// Get a project by ID.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            "SELECT id, name, created_at FROM projects WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(project)
    }

    /// Add a member, or change the role of an existing one.
    pub async fn add_member(
        conn: &mut SqliteConnection,
        project_id: i64,
        user_id: i64,
        role: ProjectRole,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO project_members (project_id, user_id, role) VALUES (?, ?, ?)
             ON CONFLICT(project_id, user_id) DO UPDATE SET role = excluded.role",
        )
        .bind(project_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Get a user's role in a project, if they are a member.
    pub async fn member_role(
        conn: &mut SqliteConnection,
        project_id: i64,
        user_id: i64,
    ) -> Result<Option<ProjectRole>> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM project_members WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        role.map(|r| r.parse().map_err(VaultError::Database))
            .transpose()
    }

    /// Get the owner of a project (the quota owner).
    pub async fn owner(conn: &mut SqliteConnection, project_id: i64) -> Result<Option<User>> {
        let owner = sqlx::query_as::<_, User>(
            "SELECT u.id, u.username, u.storage_quota_mb, u.storage_used_bytes, u.created_at
             FROM users u
             JOIN project_members m ON m.user_id = u.id
             WHERE m.project_id = ? AND m.role = 'owner'
             ORDER BY m.created_at, u.id
             LIMIT 1",
        )
        .bind(project_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewUser, UserRepository};
    use crate::Database;

    #[test]
    fn test_role_ordering_and_predicates() {
        assert!(ProjectRole::Owner > ProjectRole::Admin);
        assert!(ProjectRole::Admin > ProjectRole::Editor);
        assert!(ProjectRole::Editor > ProjectRole::Viewer);

        assert!(!ProjectRole::Viewer.can_modify());
        assert!(ProjectRole::Editor.can_modify());
        assert!(!ProjectRole::Editor.can_delete());
        assert!(ProjectRole::Admin.can_delete());
        assert!(ProjectRole::Owner.can_manage());
        assert!(!ProjectRole::Editor.can_manage());
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("owner".parse::<ProjectRole>(), Ok(ProjectRole::Owner));
        assert_eq!("EDITOR".parse::<ProjectRole>(), Ok(ProjectRole::Editor));
        assert!("superuser".parse::<ProjectRole>().is_err());
    }

    #[tokio::test]
    async fn test_create_project_registers_owner() {
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let alice = UserRepository::create(&mut conn, &NewUser::new("alice"))
            .await
            .unwrap();

        let project = ProjectRepository::create(&mut conn, "Game", alice.id)
            .await
            .unwrap();
        assert_eq!(project.name, "Game");

        let role = ProjectRepository::member_role(&mut conn, project.id, alice.id)
            .await
            .unwrap();
        assert_eq!(role, Some(ProjectRole::Owner));

        let owner = ProjectRepository::owner(&mut conn, project.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.id, alice.id);
    }

    #[tokio::test]
    async fn test_add_member_updates_role() {
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let alice = UserRepository::create(&mut conn, &NewUser::new("alice"))
            .await
            .unwrap();
        let bob = UserRepository::create(&mut conn, &NewUser::new("bob"))
            .await
            .unwrap();
        let project = ProjectRepository::create(&mut conn, "Game", alice.id)
            .await
            .unwrap();

        ProjectRepository::add_member(&mut conn, project.id, bob.id, ProjectRole::Viewer)
            .await
            .unwrap();
        ProjectRepository::add_member(&mut conn, project.id, bob.id, ProjectRole::Editor)
            .await
            .unwrap();
        let role = ProjectRepository::member_role(&mut conn, project.id, bob.id)
            .await
            .unwrap();
        assert_eq!(role, Some(ProjectRole::Editor));
    }
}
