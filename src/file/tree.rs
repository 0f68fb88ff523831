//! Directory tree service.
//!
//! Every mutation runs in one transaction under the project lock, so the
//! materialized file paths below a renamed or moved directory are rewritten
//! atomically with the change itself.

use std::collections::VecDeque;

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use super::directory::{Directory, DirectoryRepository};
use super::path::{join_path, resolve_unique_name, validate_directory_name, with_suffix};
use super::quota;
use super::record::FileRepository;
use super::storage::StorageGateway;
use crate::auth::{require_delete, require_modify, AccessControl};
use crate::db::Database;
use crate::error::DirectoryConflict;
use crate::{Result, VaultError};

/// Service for creating, reorganizing and reading directory trees.
pub struct DirectoryService<'a> {
    db: &'a Database,
    access: &'a dyn AccessControl,
    storage: &'a dyn StorageGateway,
}

impl<'a> DirectoryService<'a> {
    /// Create a new DirectoryService.
    pub fn new(
        db: &'a Database,
        access: &'a dyn AccessControl,
        storage: &'a dyn StorageGateway,
    ) -> Self {
        Self {
            db,
            access,
            storage,
        }
    }

    async fn project_of_directory(&self, directory_id: i64) -> Result<i64> {
        let mut conn = self.db.acquire().await?;
        DirectoryRepository::get_by_id(&mut conn, directory_id)
            .await?
            .map(|d| d.project_id)
            .ok_or_else(|| VaultError::NotFound("directory".to_string()))
    }

    /// Create a directory under `parent_id`, or at the project root.
    ///
    /// # Permission Check
    /// Editor role or higher.
    pub async fn create_directory(
        &self,
        user_id: i64,
        project_id: i64,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<Directory> {
        let _guard = self.db.lock_project(project_id).await;
        let mut tx = self.db.begin_write().await?;

        let role = self
            .access
            .require_access(&mut tx, user_id, project_id)
            .await?;
        require_modify(role)?;

        let name = validate_directory_name(name)?;

        if let Some(parent_id) = parent_id {
            match DirectoryRepository::get_by_id(&mut tx, parent_id).await? {
                Some(parent) if parent.project_id == project_id => {}
                _ => return Err(VaultError::NotFound("parent directory".to_string())),
            }
        }

        if DirectoryRepository::find_child(&mut tx, project_id, parent_id, &name)
            .await?
            .is_some()
        {
            return Err(VaultError::Conflict(format!(
                "a directory named '{name}' already exists here"
            )));
        }

        let directory = DirectoryRepository::create(&mut tx, project_id, parent_id, &name).await?;
        tx.commit().await?;

        info!(
            "Created directory {} '{}' in project {}",
            directory.id, directory.name, project_id
        );
        Ok(directory)
    }

    /// Rename a directory and rewrite the paths of every file below it.
    ///
    /// # Permission Check
    /// Editor role or higher.
    pub async fn rename_directory(
        &self,
        user_id: i64,
        directory_id: i64,
        new_name: &str,
    ) -> Result<Directory> {
        let project_id = self.project_of_directory(directory_id).await?;
        let _guard = self.db.lock_project(project_id).await;
        let mut tx = self.db.begin_write().await?;

        let role = self
            .access
            .require_access(&mut tx, user_id, project_id)
            .await?;
        require_modify(role)?;

        let directory = DirectoryRepository::get_by_id(&mut tx, directory_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("directory".to_string()))?;

        let name = validate_directory_name(new_name)?;
        if name == directory.name {
            return Ok(directory);
        }

        if let Some(existing) =
            DirectoryRepository::find_child(&mut tx, project_id, directory.parent_id, &name).await?
        {
            if existing.id != directory.id {
                return Err(VaultError::Conflict(format!(
                    "a directory named '{name}' already exists here"
                )));
            }
        }

        DirectoryRepository::rename(&mut tx, directory_id, &name).await?;
        let path = DirectoryRepository::path_of(&mut tx, directory_id).await?;
        let rewritten = DirectoryRepository::rewrite_file_paths(&mut tx, directory_id, &path).await?;

        let renamed = DirectoryRepository::get_by_id(&mut tx, directory_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("directory".to_string()))?;
        tx.commit().await?;

        info!(
            "Renamed directory {} from '{}' to '{}' ({} file paths rewritten)",
            directory_id, directory.name, renamed.name, rewritten
        );
        Ok(renamed)
    }

    /// Move a directory under `new_parent_id`, or to the project root.
    ///
    /// When a directory with the same name already exists at the destination
    /// the move fails with `DirectoryConflict`, unless `merge` is set, in
    /// which case the moved directory is merged into the existing one and
    /// the existing one is returned.
    ///
    /// # Permission Check
    /// Editor role or higher.
    pub async fn move_directory(
        &self,
        user_id: i64,
        directory_id: i64,
        new_parent_id: Option<i64>,
        merge: bool,
    ) -> Result<Directory> {
        let project_id = self.project_of_directory(directory_id).await?;
        let _guard = self.db.lock_project(project_id).await;
        let mut tx = self.db.begin_write().await?;

        let role = self
            .access
            .require_access(&mut tx, user_id, project_id)
            .await?;
        require_modify(role)?;

        let directory = DirectoryRepository::get_by_id(&mut tx, directory_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("directory".to_string()))?;

        if let Some(parent_id) = new_parent_id {
            if parent_id == directory_id {
                return Err(VaultError::Validation(
                    "cannot move a directory into itself".to_string(),
                ));
            }
            match DirectoryRepository::get_by_id(&mut tx, parent_id).await? {
                Some(parent) if parent.project_id == project_id => {}
                _ => return Err(VaultError::NotFound("destination directory".to_string())),
            }
            if DirectoryRepository::is_within(&mut tx, parent_id, directory_id).await? {
                return Err(VaultError::Validation(
                    "cannot move a directory into one of its descendants".to_string(),
                ));
            }
        }

        if directory.parent_id == new_parent_id {
            return Ok(directory);
        }

        if let Some(existing) =
            DirectoryRepository::find_child(&mut tx, project_id, new_parent_id, &directory.name)
                .await?
        {
            if !merge {
                return Err(VaultError::DirectoryConflict(Box::new(DirectoryConflict {
                    moving: directory,
                    existing,
                })));
            }

            let target = merge_into(&mut tx, directory, existing).await?;
            tx.commit().await?;
            return Ok(target);
        }

        DirectoryRepository::set_parent(&mut tx, directory_id, new_parent_id).await?;
        let path = DirectoryRepository::path_of(&mut tx, directory_id).await?;
        let rewritten = DirectoryRepository::rewrite_file_paths(&mut tx, directory_id, &path).await?;

        let moved = DirectoryRepository::get_by_id(&mut tx, directory_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("directory".to_string()))?;
        tx.commit().await?;

        info!(
            "Moved directory {} to '{}' ({} file paths rewritten)",
            directory_id, path, rewritten
        );
        Ok(moved)
    }

    /// Delete a directory, its descendants and every file inside them.
    ///
    /// Returns false if the directory does not exist. Confirmed file sizes
    /// are released from the owner's quota in the same transaction; blobs are
    /// removed after commit and failures there are only logged.
    ///
    /// # Permission Check
    /// Admin role or higher.
    pub async fn delete_directory(&self, user_id: i64, directory_id: i64) -> Result<bool> {
        let project_id = match self.project_of_directory(directory_id).await {
            Ok(project_id) => project_id,
            Err(VaultError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let _guard = self.db.lock_project(project_id).await;
        let mut tx = self.db.begin_write().await?;

        let role = self
            .access
            .require_access(&mut tx, user_id, project_id)
            .await?;
        require_delete(role)?;

        if DirectoryRepository::get_by_id(&mut tx, directory_id)
            .await?
            .is_none()
        {
            return Ok(false);
        }

        let directory_ids = DirectoryRepository::subtree_ids(&mut tx, directory_id).await?;
        let files = FileRepository::list_in_directories(&mut tx, &directory_ids).await?;

        let mut released = 0;
        for file in &files {
            if let Some(deleted) = FileRepository::delete(&mut tx, file.id).await? {
                if deleted.is_confirmed() {
                    released += deleted.size;
                }
            }
        }
        if released > 0 {
            quota::release(&mut tx, project_id, released).await?;
        }

        // Deepest first: breadth-first order reversed
        for id in directory_ids.iter().rev() {
            DirectoryRepository::delete(&mut tx, *id).await?;
        }
        tx.commit().await?;

        for file in &files {
            if let Err(e) = self.storage.delete(&file.storage_key).await {
                warn!(
                    "Failed to delete blob {} of removed file {}: {}",
                    file.storage_key, file.id, e
                );
            }
        }

        info!(
            "Deleted directory {} with {} subdirectories and {} files ({} bytes released)",
            directory_id,
            directory_ids.len() - 1,
            files.len(),
            released
        );
        Ok(true)
    }

    /// Get a directory.
    pub async fn get_directory(&self, user_id: i64, directory_id: i64) -> Result<Directory> {
        let mut conn = self.db.acquire().await?;
        let directory = DirectoryRepository::get_by_id(&mut conn, directory_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("directory".to_string()))?;
        self.access
            .require_access(&mut conn, user_id, directory.project_id)
            .await?;
        Ok(directory)
    }

    /// List the direct children of a directory, or the root-level
    /// directories when `parent_id` is None.
    pub async fn list_directories(
        &self,
        user_id: i64,
        project_id: i64,
        parent_id: Option<i64>,
    ) -> Result<Vec<Directory>> {
        let mut conn = self.db.acquire().await?;
        self.access
            .require_access(&mut conn, user_id, project_id)
            .await?;

        if let Some(parent_id) = parent_id {
            match DirectoryRepository::get_by_id(&mut conn, parent_id).await? {
                Some(parent) if parent.project_id == project_id => {}
                _ => return Err(VaultError::NotFound("directory".to_string())),
            }
        }

        DirectoryRepository::list_children(&mut conn, project_id, parent_id).await
    }

    /// List every directory of a project.
    pub async fn list_all_directories(
        &self,
        user_id: i64,
        project_id: i64,
    ) -> Result<Vec<Directory>> {
        let mut conn = self.db.acquire().await?;
        self.access
            .require_access(&mut conn, user_id, project_id)
            .await?;
        DirectoryRepository::list_by_project(&mut conn, project_id).await
    }

    /// Full path of a directory (`a/b/c`).
    pub async fn directory_path(&self, user_id: i64, directory_id: i64) -> Result<String> {
        let mut conn = self.db.acquire().await?;
        let directory = DirectoryRepository::get_by_id(&mut conn, directory_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("directory".to_string()))?;
        self.access
            .require_access(&mut conn, user_id, directory.project_id)
            .await?;
        DirectoryRepository::path_of(&mut conn, directory_id).await
    }

    /// Resolve a slash-separated path (`a/b/c`) to a directory.
    pub async fn get_directory_by_path(
        &self,
        user_id: i64,
        project_id: i64,
        path: &str,
    ) -> Result<Directory> {
        let mut conn = self.db.acquire().await?;
        self.access
            .require_access(&mut conn, user_id, project_id)
            .await?;

        let segments: Vec<&str> = path
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(VaultError::Validation("path cannot be empty".to_string()));
        }

        let mut current: Option<Directory> = None;
        for segment in segments {
            let parent_id = current.as_ref().map(|d| d.id);
            current = Some(
                DirectoryRepository::find_child(&mut conn, project_id, parent_id, segment)
                    .await?
                    .ok_or_else(|| VaultError::NotFound(format!("directory '{path}'")))?,
            );
        }

        current.ok_or_else(|| VaultError::NotFound(format!("directory '{path}'")))
    }
}

/// Merge `source` into `target`, returning the refreshed target.
///
/// Files move into the matching target directory; a name already used by a
/// confirmed file there gets a timestamp suffix. Child directories either
/// merge into a same-named child of the target or are reparented under it.
/// Emptied sources are deleted deepest-first at the end.
async fn merge_into(
    conn: &mut SqliteConnection,
    source: Directory,
    target: Directory,
) -> Result<Directory> {
    let project_id = target.project_id;
    let target_id = target.id;
    let source_id = source.id;
    let mut worklist = VecDeque::from([(source, target)]);
    let mut emptied = Vec::new();
    let mut moved_files = 0;

    while let Some((source, target)) = worklist.pop_front() {
        let target_path = DirectoryRepository::path_of(&mut *conn, target.id).await?;

        let files = FileRepository::list_in_directory(&mut *conn, project_id, Some(source.id)).await?;
        for file in files {
            let path = join_path(Some(&target_path), &file.file_name);
            let name = if FileRepository::path_taken(&mut *conn, project_id, &path, Some(file.id))
                .await?
            {
                let suffix = format!("_{}", Utc::now().format("%Y%m%d%H%M%S"));
                let suffixed = with_suffix(&file.file_name, &suffix);
                let name = resolve_unique_name(
                    &mut *conn,
                    project_id,
                    Some(&target_path),
                    &suffixed,
                    Some(file.id),
                )
                .await?;
                debug!(
                    "Renaming merged file {} from '{}' to '{}'",
                    file.id, file.file_name, name
                );
                name
            } else {
                file.file_name.clone()
            };

            let path = join_path(Some(&target_path), &name);
            FileRepository::relocate(&mut *conn, file.id, Some(target.id), &name, &path).await?;
            moved_files += 1;
        }

        let children = DirectoryRepository::list_children(&mut *conn, project_id, Some(source.id)).await?;
        for child in children {
            match DirectoryRepository::find_child(&mut *conn, project_id, Some(target.id), &child.name)
                .await?
            {
                Some(existing) => worklist.push_back((child, existing)),
                None => {
                    DirectoryRepository::set_parent(&mut *conn, child.id, Some(target.id)).await?;
                    let child_path = join_path(Some(&target_path), &child.name);
                    DirectoryRepository::rewrite_file_paths(&mut *conn, child.id, &child_path)
                        .await?;
                }
            }
        }

        emptied.push(source.id);
    }

    for id in emptied.iter().rev() {
        DirectoryRepository::delete(&mut *conn, *id).await?;
    }

    info!(
        "Merged directory {} into {} ({} files moved, {} directories removed)",
        source_id,
        target_id,
        moved_files,
        emptied.len()
    );

    DirectoryRepository::get_by_id(conn, target_id)
        .await?
        .ok_or_else(|| VaultError::NotFound("directory".to_string()))
}
