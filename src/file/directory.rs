//! Directory types and repository.
//!
//! Directories are parent-pointer rows. Paths are never stored for
//! directories; they are computed by walking up the parent chain. Every walk
//! carries a visited set so a corrupted cycle ends the walk instead of
//! looping forever.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use sqlx::SqliteConnection;

use crate::{Result, VaultError};

const DIRECTORY_COLUMNS: &str = "id, project_id, parent_id, name, created_at, updated_at";

/// A directory in a project tree.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct Directory {
    /// Unique directory ID.
    pub id: i64,
    /// Owning project.
    pub project_id: i64,
    /// Parent directory ID (None for root-level directories).
    pub parent_id: Option<i64>,
    /// Directory name, unique among its siblings.
    pub name: String,
    /// When the directory was created.
    pub created_at: String,
    /// When the directory was last renamed or moved.
    pub updated_at: String,
}

/// Repository for directory rows.
pub struct DirectoryRepository;

impl DirectoryRepository {
    /// Insert a directory.
    pub async fn create(
        conn: &mut SqliteConnection,
        project_id: i64,
        parent_id: Option<i64>,
        name: &str,
    ) -> Result<Directory> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO directories (project_id, parent_id, name) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(project_id)
        .bind(parent_id)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;

        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| VaultError::NotFound("directory".to_string()))
    }

    /// Get a directory by ID.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Directory>> {
        let directory = sqlx::query_as::<_, Directory>(&format!(
            "SELECT {DIRECTORY_COLUMNS} FROM directories WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(directory)
    }

    /// Find a child of `parent_id` (root when None) by exact name.
    pub async fn find_child(
        conn: &mut SqliteConnection,
        project_id: i64,
        parent_id: Option<i64>,
        name: &str,
    ) -> Result<Option<Directory>> {
        let directory = sqlx::query_as::<_, Directory>(&format!(
            "SELECT {DIRECTORY_COLUMNS} FROM directories
             WHERE project_id = ? AND parent_id IS ? AND name = ?"
        ))
        .bind(project_id)
        .bind(parent_id)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(directory)
    }

    /// List the direct children of `parent_id` (root when None), by name.
    pub async fn list_children(
        conn: &mut SqliteConnection,
        project_id: i64,
        parent_id: Option<i64>,
    ) -> Result<Vec<Directory>> {
        let directories = sqlx::query_as::<_, Directory>(&format!(
            "SELECT {DIRECTORY_COLUMNS} FROM directories
             WHERE project_id = ? AND parent_id IS ?
             ORDER BY name"
        ))
        .bind(project_id)
        .bind(parent_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(directories)
    }

    /// List every directory of a project.
    pub async fn list_by_project(
        conn: &mut SqliteConnection,
        project_id: i64,
    ) -> Result<Vec<Directory>> {
        let directories = sqlx::query_as::<_, Directory>(&format!(
            "SELECT {DIRECTORY_COLUMNS} FROM directories WHERE project_id = ? ORDER BY id"
        ))
        .bind(project_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(directories)
    }

    /// Rename a directory.
    pub async fn rename(conn: &mut SqliteConnection, id: i64, name: &str) -> Result<()> {
        sqlx::query("UPDATE directories SET name = ?, updated_at = datetime('now') WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Reparent a directory.
    pub async fn set_parent(
        conn: &mut SqliteConnection,
        id: i64,
        parent_id: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE directories SET parent_id = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(parent_id)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Delete a single directory row.
    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM directories WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The chain from the root down to `id`, inclusive.
    pub async fn chain(conn: &mut SqliteConnection, id: i64) -> Result<Vec<Directory>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(id);

        while let Some(dir_id) = current {
            if !visited.insert(dir_id) {
                break;
            }
            let Some(directory) = Self::get_by_id(&mut *conn, dir_id).await? else {
                break;
            };
            current = directory.parent_id;
            chain.push(directory);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Full path of a directory: ancestor names joined with `/`.
    pub async fn path_of(conn: &mut SqliteConnection, id: i64) -> Result<String> {
        let chain = Self::chain(conn, id).await?;
        if chain.is_empty() {
            return Err(VaultError::NotFound("directory".to_string()));
        }
        Ok(chain
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join("/"))
    }

    /// Whether `candidate` is `ancestor` or lies anywhere below it.
    pub async fn is_within(
        conn: &mut SqliteConnection,
        candidate: i64,
        ancestor: i64,
    ) -> Result<bool> {
        let mut visited = HashSet::new();
        let mut current = Some(candidate);

        while let Some(dir_id) = current {
            if dir_id == ancestor {
                return Ok(true);
            }
            if !visited.insert(dir_id) {
                break;
            }
            current = sqlx::query_scalar::<_, Option<i64>>(
                "SELECT parent_id FROM directories WHERE id = ?",
            )
            .bind(dir_id)
            .fetch_optional(&mut *conn)
            .await?
            .flatten();
        }

        Ok(false)
    }

    /// IDs of `root` and all of its descendants, breadth-first from the root.
    pub async fn subtree_ids(conn: &mut SqliteConnection, root: i64) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([root]);

        while let Some(dir_id) = queue.pop_front() {
            if !visited.insert(dir_id) {
                continue;
            }
            ids.push(dir_id);

            let children: Vec<i64> =
                sqlx::query_scalar("SELECT id FROM directories WHERE parent_id = ? ORDER BY id")
                    .bind(dir_id)
                    .fetch_all(&mut *conn)
                    .await?;
            queue.extend(children);
        }

        Ok(ids)
    }

    /// Recompute the path of every file under `root`, whose own path is
    /// `root_path`.
    ///
    /// Walks the subtree top-down so each directory's prefix is derived from
    /// its parent's freshly computed one.
    pub async fn rewrite_file_paths(
        conn: &mut SqliteConnection,
        root: i64,
        root_path: &str,
    ) -> Result<u64> {
        let mut rewritten = 0;
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([(root, root_path.to_string())]);

        while let Some((dir_id, dir_path)) = queue.pop_front() {
            if !visited.insert(dir_id) {
                continue;
            }

            let result = sqlx::query("UPDATE files SET path = ? || file_name WHERE directory_id = ?")
                .bind(format!("{dir_path}/"))
                .bind(dir_id)
                .execute(&mut *conn)
                .await?;
            rewritten += result.rows_affected();

            let children: Vec<(i64, String)> =
                sqlx::query_as("SELECT id, name FROM directories WHERE parent_id = ?")
                    .bind(dir_id)
                    .fetch_all(&mut *conn)
                    .await?;
            for (child_id, child_name) in children {
                queue.push_back((child_id, format!("{dir_path}/{child_name}")));
            }
        }

        Ok(rewritten)
    }
}
