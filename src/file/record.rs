//! File record types and repository.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::path::storage_key;
use crate::{Result, VaultError};

const FILE_COLUMNS: &str = "id, project_id, directory_id, file_name, path, content_type, size, \
                            status, storage_key, uploader_id, uploaded_at, confirmed_at";

/// Upload lifecycle status of a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Upload URL issued; the blob is not verified yet.
    #[default]
    Pending,
    /// Blob verified and quota charged.
    Confirmed,
}

impl FileStatus {
    /// Convert status to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for FileStatus {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        match s.as_str() {
            "pending" => Ok(FileStatus::Pending),
            "confirmed" => Ok(FileStatus::Confirmed),
            _ => Err(format!("unknown file status: {s}")),
        }
    }
}

/// A file in a project tree.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct FileRecord {
    /// Unique file ID.
    pub id: i64,
    /// Owning project.
    pub project_id: i64,
    /// Containing directory (None for the project root).
    pub directory_id: Option<i64>,
    /// File name including extension.
    pub file_name: String,
    /// Materialized path: directory path + "/" + file name.
    pub path: String,
    /// MIME type declared at upload time.
    pub content_type: String,
    /// Size in bytes.
    pub size: i64,
    /// Lifecycle status.
    #[sqlx(try_from = "String")]
    pub status: FileStatus,
    /// Key of the blob in object storage.
    pub storage_key: String,
    /// User who requested the upload.
    pub uploader_id: i64,
    /// When the upload was requested.
    pub uploaded_at: String,
    /// When the upload was confirmed.
    pub confirmed_at: Option<String>,
    /// Normalized tags, sorted.
    #[sqlx(skip)]
    pub tags: Vec<String>,
}

impl FileRecord {
    /// Whether the upload has been confirmed.
    pub fn is_confirmed(&self) -> bool {
        self.status == FileStatus::Confirmed
    }
}

/// Data for creating a pending file record.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    /// Owning project.
    pub project_id: i64,
    /// Containing directory.
    pub directory_id: Option<i64>,
    /// Sanitized, unique file name.
    pub file_name: String,
    /// Materialized path.
    pub path: String,
    /// MIME type.
    pub content_type: String,
    /// Declared size in bytes.
    pub size: i64,
    /// Requesting user.
    pub uploader_id: i64,
    /// Normalized tags.
    pub tags: Vec<String>,
}

/// How a tag filter matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagMatch {
    /// File carries at least one of the tags.
    #[default]
    Any,
    /// File carries every tag.
    All,
}

/// Which directories a listing covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectoryScope {
    /// Every file in the project.
    #[default]
    Anywhere,
    /// Only files at the project root.
    Root,
    /// Only files directly inside a directory.
    In(i64),
}

/// Filter for listing confirmed files.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// Tags to match (normalized before use); empty means no tag filter.
    pub tags: Vec<String>,
    /// Tag matching mode.
    pub tag_match: TagMatch,
    /// Directory scope.
    pub scope: DirectoryScope,
}

impl FileFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match files carrying any of these tags.
    pub fn with_any_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self.tag_match = TagMatch::Any;
        self
    }

    /// Match files carrying all of these tags.
    pub fn with_all_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self.tag_match = TagMatch::All;
        self
    }

    /// Restrict to the project root.
    pub fn at_root(mut self) -> Self {
        self.scope = DirectoryScope::Root;
        self
    }

    /// Restrict to one directory.
    pub fn in_directory(mut self, directory_id: i64) -> Self {
        self.scope = DirectoryScope::In(directory_id);
        self
    }
}

/// Repository for file records and their tags.
pub struct FileRepository;

impl FileRepository {
    /// Insert a pending record, derive its storage key and store its tags.
    pub async fn create_pending(
        conn: &mut SqliteConnection,
        new_file: &NewFileRecord,
    ) -> Result<FileRecord> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO files (project_id, directory_id, file_name, path, content_type, size, uploader_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(new_file.project_id)
        .bind(new_file.directory_id)
        .bind(&new_file.file_name)
        .bind(&new_file.path)
        .bind(&new_file.content_type)
        .bind(new_file.size)
        .bind(new_file.uploader_id)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query("UPDATE files SET storage_key = ? WHERE id = ?")
            .bind(storage_key(new_file.project_id, id, &new_file.file_name))
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Self::set_tags(&mut *conn, id, &new_file.tags).await?;

        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))
    }

    /// Get a file by ID, with its tags.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<FileRecord>> {
        let file = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        match file {
            Some(mut file) => {
                file.tags = Self::tags_of(conn, file.id).await?;
                Ok(Some(file))
            }
            None => Ok(None),
        }
    }

    /// Whether a confirmed file other than `exclude_id` occupies `path`.
    pub async fn path_taken(
        conn: &mut SqliteConnection,
        project_id: i64,
        path: &str,
        exclude_id: Option<i64>,
    ) -> Result<bool> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM files
                WHERE project_id = ? AND path = ? AND status = 'confirmed' AND id IS NOT ?
            )",
        )
        .bind(project_id)
        .bind(path)
        .bind(exclude_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(taken)
    }

    /// Flip a pending record to confirmed. Returns false if it was not pending.
    pub async fn mark_confirmed(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET status = 'confirmed', confirmed_at = datetime('now')
             WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a record, returning the row as it was.
    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<Option<FileRecord>> {
        let file = sqlx::query_as::<_, FileRecord>(&format!(
            "DELETE FROM files WHERE id = ? RETURNING {FILE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(file)
    }

    /// Delete a record only while it is still pending.
    pub async fn delete_pending(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ? AND status = 'pending'")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a record to another directory, possibly under a new name.
    pub async fn relocate(
        conn: &mut SqliteConnection,
        id: i64,
        directory_id: Option<i64>,
        file_name: &str,
        path: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE files SET directory_id = ?, file_name = ?, path = ? WHERE id = ?")
            .bind(directory_id)
            .bind(file_name)
            .bind(path)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Rename a record and point it at a new blob.
    pub async fn rename(
        conn: &mut SqliteConnection,
        id: i64,
        file_name: &str,
        path: &str,
        storage_key: &str,
    ) -> Result<()> {
        sqlx::query("UPDATE files SET file_name = ?, path = ?, storage_key = ? WHERE id = ?")
            .bind(file_name)
            .bind(path)
            .bind(storage_key)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Every record directly inside a directory (root when None), any status.
    pub async fn list_in_directory(
        conn: &mut SqliteConnection,
        project_id: i64,
        directory_id: Option<i64>,
    ) -> Result<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE project_id = ? AND directory_id IS ?
             ORDER BY id"
        ))
        .bind(project_id)
        .bind(directory_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(files)
    }

    /// Every record inside any of the given directories, any status.
    pub async fn list_in_directories(
        conn: &mut SqliteConnection,
        directory_ids: &[i64],
    ) -> Result<Vec<FileRecord>> {
        if directory_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE directory_id IN ("
        ));
        let mut separated = query.separated(", ");
        for id in directory_ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY id");

        let files = query
            .build_query_as::<FileRecord>()
            .fetch_all(&mut *conn)
            .await?;
        Ok(files)
    }

    /// Replace the tag set of a file.
    pub async fn set_tags(conn: &mut SqliteConnection, file_id: i64, tags: &[String]) -> Result<()> {
        sqlx::query("DELETE FROM file_tags WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *conn)
            .await?;

        for tag in tags {
            sqlx::query("INSERT OR IGNORE INTO file_tags (file_id, tag) VALUES (?, ?)")
                .bind(file_id)
                .bind(tag)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn tags_of(conn: &mut SqliteConnection, file_id: i64) -> Result<Vec<String>> {
        let tags: Vec<String> =
            sqlx::query_scalar("SELECT tag FROM file_tags WHERE file_id = ? ORDER BY tag")
                .bind(file_id)
                .fetch_all(&mut *conn)
                .await?;
        Ok(tags)
    }

    /// Attach tags to a batch of records with one query.
    pub async fn load_tags(conn: &mut SqliteConnection, files: &mut [FileRecord]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT file_id, tag FROM file_tags WHERE file_id IN (");
        let mut separated = query.separated(", ");
        for file in files.iter() {
            separated.push_bind(file.id);
        }
        separated.push_unseparated(") ORDER BY tag");

        let rows: Vec<(i64, String)> = query.build_query_as().fetch_all(&mut *conn).await?;

        let mut by_file: HashMap<i64, Vec<String>> = HashMap::new();
        for (file_id, tag) in rows {
            by_file.entry(file_id).or_default().push(tag);
        }
        for file in files.iter_mut() {
            file.tags = by_file.remove(&file.id).unwrap_or_default();
        }
        Ok(())
    }

    /// List confirmed files of a project matching a filter, ordered by path.
    ///
    /// Filter tags are expected to be normalized already.
    pub async fn list_confirmed(
        conn: &mut SqliteConnection,
        project_id: i64,
        filter: &FileFilter,
    ) -> Result<Vec<FileRecord>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE status = 'confirmed' AND project_id = "
        ));
        query.push_bind(project_id);

        match filter.scope {
            DirectoryScope::Anywhere => {}
            DirectoryScope::Root => {
                query.push(" AND directory_id IS NULL");
            }
            DirectoryScope::In(directory_id) => {
                query.push(" AND directory_id = ");
                query.push_bind(directory_id);
            }
        }

        if !filter.tags.is_empty() {
            query.push(" AND id IN (SELECT file_id FROM file_tags WHERE tag IN (");
            let mut separated = query.separated(", ");
            for tag in &filter.tags {
                separated.push_bind(tag.clone());
            }
            separated.push_unseparated(")");

            if filter.tag_match == TagMatch::All {
                query.push(" GROUP BY file_id HAVING COUNT(DISTINCT tag) = ");
                query.push_bind(filter.tags.len() as i64);
            }
            query.push(")");
        }

        query.push(" ORDER BY path, id");

        let mut files = query
            .build_query_as::<FileRecord>()
            .fetch_all(&mut *conn)
            .await?;
        Self::load_tags(conn, &mut files).await?;
        Ok(files)
    }

    /// Distinct tags used by the confirmed files of a project, sorted.
    pub async fn project_tags(conn: &mut SqliteConnection, project_id: i64) -> Result<Vec<String>> {
        let tags: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT t.tag FROM file_tags t
             JOIN files f ON f.id = t.file_id
             WHERE f.project_id = ? AND f.status = 'confirmed'
             ORDER BY t.tag",
        )
        .bind(project_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(tags)
    }

    /// Pending records requested more than `older_than_secs` seconds ago.
    pub async fn list_stale_pending(
        conn: &mut SqliteConnection,
        older_than_secs: u64,
    ) -> Result<Vec<FileRecord>> {
        let files = sqlx::query_as::<_, FileRecord>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE status = 'pending' AND uploaded_at < datetime('now', ?)
             ORDER BY id"
        ))
        .bind(format!("-{older_than_secs} seconds"))
        .fetch_all(&mut *conn)
        .await?;
        Ok(files)
    }
}
