//! Upload lifecycle service.
//!
//! Uploads are two-phase. `request_upload` validates the request, reserves a
//! unique name with a pending record and returns a presigned PUT URL; the
//! client then sends the bytes straight to object storage. `confirm_upload`
//! verifies the blob landed and only then charges the owner's quota.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::directory::DirectoryRepository;
use super::path::{
    join_path, rename_keeping_extension, resolve_unique_name, sanitize_file_name, storage_key,
};
use super::quota::{self, QuotaUsage};
use super::record::{DirectoryScope, FileFilter, FileRecord, FileRepository, NewFileRecord};
use super::storage::StorageGateway;
use super::tags::{normalize_tags, validate_and_normalize};
use super::{ALLOWED_CONTENT_TYPES, MAX_FILE_SIZE, MAX_TAGS, MAX_TAG_LENGTH};
use crate::auth::{require_delete, require_modify, AccessControl};
use crate::config::{StorageConfig, UploadsConfig};
use crate::db::Database;
use crate::error::format_mb;
use crate::{Result, VaultError};

/// Default lifetime of a presigned upload URL (15 minutes).
pub const DEFAULT_UPLOAD_URL_EXPIRY: Duration = Duration::from_secs(15 * 60);

/// Default lifetime of a presigned download URL (1 hour).
pub const DEFAULT_DOWNLOAD_URL_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Limits applied to upload requests.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Maximum size in bytes (inclusive).
    pub max_file_size: i64,
    /// Accepted content types (compared case-insensitively).
    pub allowed_content_types: Vec<String>,
    /// Maximum number of tags per file.
    pub max_tags: usize,
    /// Maximum length of a tag.
    pub max_tag_length: usize,
    /// Lifetime of upload URLs.
    pub upload_url_expiry: Duration,
    /// Lifetime of download URLs.
    pub download_url_expiry: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            allowed_content_types: ALLOWED_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
            max_tags: MAX_TAGS,
            max_tag_length: MAX_TAG_LENGTH,
            upload_url_expiry: DEFAULT_UPLOAD_URL_EXPIRY,
            download_url_expiry: DEFAULT_DOWNLOAD_URL_EXPIRY,
        }
    }
}

impl UploadPolicy {
    /// Build a policy from configuration.
    pub fn from_config(uploads: &UploadsConfig, storage: &StorageConfig) -> Self {
        Self {
            max_file_size: uploads.max_file_size_bytes,
            allowed_content_types: uploads.allowed_content_types.clone(),
            max_tags: uploads.max_tags,
            max_tag_length: uploads.max_tag_length,
            upload_url_expiry: Duration::from_secs(storage.upload_url_expiry_secs),
            download_url_expiry: Duration::from_secs(storage.download_url_expiry_secs),
        }
    }

    fn allows_content_type(&self, content_type: &str) -> bool {
        let content_type = content_type.trim();
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(content_type))
    }
}

/// Request data for a new upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Target project.
    pub project_id: i64,
    /// Target directory (None for the project root).
    pub directory_id: Option<i64>,
    /// Client-supplied file name.
    pub file_name: String,
    /// Declared MIME type.
    pub content_type: String,
    /// Declared size in bytes.
    pub size: i64,
    /// Raw tags.
    pub tags: Vec<String>,
}

impl UploadRequest {
    /// Create a new upload request at the project root.
    pub fn new(
        project_id: i64,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        size: i64,
    ) -> Self {
        Self {
            project_id,
            directory_id: None,
            file_name: file_name.into(),
            content_type: content_type.into(),
            size,
            tags: Vec::new(),
        }
    }

    /// Upload into a directory.
    pub fn in_directory(mut self, directory_id: i64) -> Self {
        self.directory_id = Some(directory_id);
        self
    }

    /// Set the tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Result of a granted upload request.
#[derive(Debug, Clone, Serialize)]
pub struct UploadTicket {
    /// ID of the pending file record.
    pub file_id: i64,
    /// Presigned PUT URL.
    pub upload_url: String,
    /// When the URL stops working.
    pub expires_at: DateTime<Utc>,
    /// Final (sanitized, unique) file name.
    pub file_name: String,
    /// Final materialized path.
    pub path: String,
}

/// Presigned download link for a confirmed file.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadTicket {
    /// File ID.
    pub file_id: i64,
    /// Presigned GET URL.
    pub download_url: String,
    /// When the URL stops working.
    pub expires_at: DateTime<Utc>,
    /// Name offered to the client.
    pub file_name: String,
}

fn expiry_from_now(expires_in: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(expires_in.as_secs() as i64)
}

/// Service coordinating uploads, confirmation and file maintenance.
pub struct UploadService<'a> {
    db: &'a Database,
    access: &'a dyn AccessControl,
    storage: &'a dyn StorageGateway,
    policy: UploadPolicy,
}

impl<'a> UploadService<'a> {
    /// Create a new UploadService with the default policy.
    pub fn new(
        db: &'a Database,
        access: &'a dyn AccessControl,
        storage: &'a dyn StorageGateway,
    ) -> Self {
        Self {
            db,
            access,
            storage,
            policy: UploadPolicy::default(),
        }
    }

    /// Replace the upload policy.
    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn project_of_file(&self, file_id: i64) -> Result<i64> {
        let mut conn = self.db.acquire().await?;
        FileRepository::get_by_id(&mut conn, file_id)
            .await?
            .map(|f| f.project_id)
            .ok_or_else(|| VaultError::NotFound("file".to_string()))
    }

    /// Grant an upload: validate it, reserve a unique name with a pending
    /// record and issue a presigned PUT URL.
    ///
    /// # Permission Check
    /// Editor role or higher.
    ///
    /// # Validation
    /// - Content type: image allow-list
    /// - Size: 1 byte up to the configured maximum (inclusive)
    /// - Quota: the project owner must have room for the declared size
    /// - Tags: count, length and charset limits
    pub async fn request_upload(
        &self,
        user_id: i64,
        request: &UploadRequest,
    ) -> Result<UploadTicket> {
        let project_id = request.project_id;
        let mut tx = self.db.begin_write().await?;

        let role = self
            .access
            .require_access(&mut tx, user_id, project_id)
            .await?;
        require_modify(role)?;

        if !self.policy.allows_content_type(&request.content_type) {
            return Err(VaultError::Validation(format!(
                "content type '{}' is not allowed (allowed: {})",
                request.content_type,
                self.policy.allowed_content_types.join(", ")
            )));
        }

        if request.size <= 0 || request.size > self.policy.max_file_size {
            return Err(VaultError::Validation(format!(
                "file size must be between 1 byte and {}",
                format_mb(self.policy.max_file_size)
            )));
        }

        quota::check_quota(&mut tx, project_id, request.size).await?;

        let tags = validate_and_normalize(
            &request.tags,
            self.policy.max_tags,
            self.policy.max_tag_length,
        )?;

        let directory_path = match request.directory_id {
            Some(directory_id) => {
                match DirectoryRepository::get_by_id(&mut tx, directory_id).await? {
                    Some(directory) if directory.project_id == project_id => {}
                    _ => return Err(VaultError::NotFound("directory".to_string())),
                }
                Some(DirectoryRepository::path_of(&mut tx, directory_id).await?)
            }
            None => None,
        };

        let sanitized = sanitize_file_name(&request.file_name);
        let file_name = resolve_unique_name(
            &mut tx,
            project_id,
            directory_path.as_deref(),
            &sanitized,
            None,
        )
        .await?;
        let path = join_path(directory_path.as_deref(), &file_name);

        let file = FileRepository::create_pending(
            &mut tx,
            &NewFileRecord {
                project_id,
                directory_id: request.directory_id,
                file_name,
                path,
                content_type: request.content_type.trim().to_lowercase(),
                size: request.size,
                uploader_id: user_id,
                tags,
            },
        )
        .await?;

        let upload_url = self
            .storage
            .upload_url(
                &file.storage_key,
                &file.content_type,
                file.size,
                self.policy.upload_url_expiry,
            )
            .await?;
        tx.commit().await?;

        info!(
            "Upload requested: file {} '{}' ({} bytes) in project {} by user {}",
            file.id, file.path, file.size, project_id, user_id
        );

        Ok(UploadTicket {
            file_id: file.id,
            upload_url,
            expires_at: expiry_from_now(self.policy.upload_url_expiry),
            file_name: file.file_name,
            path: file.path,
        })
    }

    /// Confirm a pending upload once its blob exists, charging the quota.
    ///
    /// # Permission Check
    /// Any project member.
    pub async fn confirm_upload(&self, user_id: i64, file_id: i64) -> Result<FileRecord> {
        let mut tx = self.db.begin_write().await?;

        let file = FileRepository::get_by_id(&mut tx, file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;
        self.access
            .require_access(&mut tx, user_id, file.project_id)
            .await?;

        if file.is_confirmed() {
            return Err(VaultError::Validation(
                "file upload is already confirmed".to_string(),
            ));
        }

        if !self.storage.exists(&file.storage_key).await? {
            return Err(VaultError::Validation(
                "file has not been uploaded to storage".to_string(),
            ));
        }

        if !FileRepository::mark_confirmed(&mut tx, file_id).await? {
            return Err(VaultError::Validation(
                "file upload is no longer pending".to_string(),
            ));
        }
        quota::charge(&mut tx, file.project_id, file.size).await?;

        let confirmed = FileRepository::get_by_id(&mut tx, file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;
        tx.commit().await?;

        info!(
            "Upload confirmed: file {} '{}' ({} bytes)",
            confirmed.id, confirmed.path, confirmed.size
        );
        Ok(confirmed)
    }

    /// Delete a file and its blob.
    ///
    /// A file that is already gone counts as deleted.
    ///
    /// # Permission Check
    /// Admin role or higher.
    pub async fn delete_file(&self, user_id: i64, file_id: i64) -> Result<()> {
        let mut tx = self.db.begin_write().await?;

        let Some(file) = FileRepository::get_by_id(&mut tx, file_id).await? else {
            debug!("File {} already removed", file_id);
            return Ok(());
        };
        let role = self
            .access
            .require_access(&mut tx, user_id, file.project_id)
            .await?;
        require_delete(role)?;

        if let Err(e) = self.storage.delete(&file.storage_key).await {
            warn!(
                "Failed to delete blob {} of file {}: {}",
                file.storage_key, file.id, e
            );
        }

        if let Some(deleted) = FileRepository::delete(&mut tx, file_id).await? {
            if deleted.is_confirmed() {
                quota::release(&mut tx, deleted.project_id, deleted.size).await?;
            }
        }
        tx.commit().await?;

        info!("Deleted file {} '{}'", file.id, file.path);
        Ok(())
    }

    /// Rename a confirmed file, keeping its extension.
    ///
    /// The blob is copied to the new key before the record changes; the old
    /// blob is removed after commit and a failure there is only logged.
    ///
    /// # Permission Check
    /// Editor role or higher.
    pub async fn rename_file(
        &self,
        user_id: i64,
        file_id: i64,
        new_name: &str,
    ) -> Result<FileRecord> {
        let project_id = self.project_of_file(file_id).await?;
        let _guard = self.db.lock_project(project_id).await;
        let mut tx = self.db.begin_write().await?;

        let role = self
            .access
            .require_access(&mut tx, user_id, project_id)
            .await?;
        require_modify(role)?;

        let file = self.confirmed_file(&mut tx, file_id).await?;

        let file_name = rename_keeping_extension(&file.file_name, new_name);
        if file_name == file.file_name {
            return Ok(file);
        }

        let directory_path = match file.directory_id {
            Some(directory_id) => Some(DirectoryRepository::path_of(&mut tx, directory_id).await?),
            None => None,
        };
        let path = join_path(directory_path.as_deref(), &file_name);
        if FileRepository::path_taken(&mut tx, project_id, &path, Some(file.id)).await? {
            return Err(VaultError::Conflict(format!(
                "a file named '{file_name}' already exists here"
            )));
        }

        let new_key = storage_key(project_id, file.id, &file_name);
        let key_changed = new_key != file.storage_key;
        if key_changed {
            self.storage.copy(&file.storage_key, &new_key).await?;
        }

        FileRepository::rename(&mut tx, file.id, &file_name, &path, &new_key).await?;
        let renamed = FileRepository::get_by_id(&mut tx, file.id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;
        tx.commit().await?;

        if key_changed {
            if let Err(e) = self.storage.delete(&file.storage_key).await {
                warn!(
                    "Failed to delete old blob {} after renaming file {}: {}",
                    file.storage_key, file.id, e
                );
            }
        }

        info!(
            "Renamed file {} from '{}' to '{}'",
            file.id, file.path, renamed.path
        );
        Ok(renamed)
    }

    /// Move a confirmed file to another directory, or to the project root.
    ///
    /// # Permission Check
    /// Editor role or higher.
    pub async fn move_file(
        &self,
        user_id: i64,
        file_id: i64,
        directory_id: Option<i64>,
    ) -> Result<FileRecord> {
        let project_id = self.project_of_file(file_id).await?;
        let _guard = self.db.lock_project(project_id).await;
        let mut tx = self.db.begin_write().await?;

        let role = self
            .access
            .require_access(&mut tx, user_id, project_id)
            .await?;
        require_modify(role)?;

        let file = self.confirmed_file(&mut tx, file_id).await?;
        if file.directory_id == directory_id {
            return Ok(file);
        }

        let directory_path = match directory_id {
            Some(directory_id) => {
                match DirectoryRepository::get_by_id(&mut tx, directory_id).await? {
                    Some(directory) if directory.project_id == project_id => {}
                    _ => return Err(VaultError::NotFound("destination directory".to_string())),
                }
                Some(DirectoryRepository::path_of(&mut tx, directory_id).await?)
            }
            None => None,
        };

        let path = join_path(directory_path.as_deref(), &file.file_name);
        if FileRepository::path_taken(&mut tx, project_id, &path, Some(file.id)).await? {
            return Err(VaultError::Conflict(format!(
                "a file named '{}' already exists at the destination",
                file.file_name
            )));
        }

        FileRepository::relocate(&mut tx, file.id, directory_id, &file.file_name, &path).await?;
        let moved = FileRepository::get_by_id(&mut tx, file.id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;
        tx.commit().await?;

        info!("Moved file {} from '{}' to '{}'", file.id, file.path, moved.path);
        Ok(moved)
    }

    /// Replace the tags of a file.
    ///
    /// # Permission Check
    /// Editor role or higher.
    pub async fn update_tags(
        &self,
        user_id: i64,
        file_id: i64,
        tags: &[String],
    ) -> Result<FileRecord> {
        let mut tx = self.db.begin_write().await?;

        let file = FileRepository::get_by_id(&mut tx, file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;
        let role = self
            .access
            .require_access(&mut tx, user_id, file.project_id)
            .await?;
        require_modify(role)?;

        let tags = validate_and_normalize(tags, self.policy.max_tags, self.policy.max_tag_length)?;
        FileRepository::set_tags(&mut tx, file_id, &tags).await?;

        let updated = FileRepository::get_by_id(&mut tx, file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;
        tx.commit().await?;

        debug!("Updated tags of file {}: {:?}", file_id, updated.tags);
        Ok(updated)
    }

    /// Distinct tags of the confirmed files in a project.
    pub async fn project_tags(&self, user_id: i64, project_id: i64) -> Result<Vec<String>> {
        let mut conn = self.db.acquire().await?;
        self.access
            .require_access(&mut conn, user_id, project_id)
            .await?;
        FileRepository::project_tags(&mut conn, project_id).await
    }

    /// List the confirmed files of a project matching a filter.
    pub async fn list_files(
        &self,
        user_id: i64,
        project_id: i64,
        filter: &FileFilter,
    ) -> Result<Vec<FileRecord>> {
        let mut conn = self.db.acquire().await?;
        self.access
            .require_access(&mut conn, user_id, project_id)
            .await?;

        if let DirectoryScope::In(directory_id) = filter.scope {
            match DirectoryRepository::get_by_id(&mut conn, directory_id).await? {
                Some(directory) if directory.project_id == project_id => {}
                _ => return Err(VaultError::NotFound("directory".to_string())),
            }
        }

        let filter = FileFilter {
            tags: normalize_tags(&filter.tags),
            ..filter.clone()
        };
        FileRepository::list_confirmed(&mut conn, project_id, &filter).await
    }

    /// Get a confirmed file.
    pub async fn get_file(&self, user_id: i64, file_id: i64) -> Result<FileRecord> {
        let mut conn = self.db.acquire().await?;
        let file = FileRepository::get_by_id(&mut conn, file_id)
            .await?
            .filter(FileRecord::is_confirmed)
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;
        self.access
            .require_access(&mut conn, user_id, file.project_id)
            .await?;
        Ok(file)
    }

    /// Issue a presigned download URL for a confirmed file.
    pub async fn download_url(&self, user_id: i64, file_id: i64) -> Result<DownloadTicket> {
        let file = self.get_file(user_id, file_id).await?;
        let download_url = self
            .storage
            .download_url(
                &file.storage_key,
                &file.file_name,
                self.policy.download_url_expiry,
            )
            .await?;

        Ok(DownloadTicket {
            file_id: file.id,
            download_url,
            expires_at: expiry_from_now(self.policy.download_url_expiry),
            file_name: file.file_name,
        })
    }

    /// Storage usage of the project owner.
    pub async fn quota(&self, user_id: i64, project_id: i64) -> Result<QuotaUsage> {
        let mut conn = self.db.acquire().await?;
        self.access
            .require_access(&mut conn, user_id, project_id)
            .await?;
        quota::usage(&mut conn, project_id).await
    }

    async fn confirmed_file(
        &self,
        conn: &mut sqlx::SqliteConnection,
        file_id: i64,
    ) -> Result<FileRecord> {
        let file = FileRepository::get_by_id(conn, file_id)
            .await?
            .ok_or_else(|| VaultError::NotFound("file".to_string()))?;
        if !file.is_confirmed() {
            return Err(VaultError::Validation(
                "only confirmed files can be changed".to_string(),
            ));
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemberAccess;
    use crate::db::{NewUser, ProjectRepository, ProjectRole, UserRepository};
    use crate::error::BYTES_PER_MB;
    use crate::file::{DirectoryService, FileStatus, MemoryStorage};

    struct Fixture {
        db: Database,
        storage: MemoryStorage,
        project_id: i64,
        owner_id: i64,
        editor_id: i64,
        viewer_id: i64,
    }

    impl Fixture {
        fn service(&self) -> UploadService<'_> {
            UploadService::new(&self.db, &MemberAccess, &self.storage)
        }

        fn directories(&self) -> DirectoryService<'_> {
            DirectoryService::new(&self.db, &MemberAccess, &self.storage)
        }

        /// Request, play the client upload, confirm.
        async fn upload(&self, request: UploadRequest) -> FileRecord {
            let service = self.service();
            let ticket = service.request_upload(self.owner_id, &request).await.unwrap();
            let key = self.storage_key_of(ticket.file_id).await;
            self.storage.put(key, vec![0u8; 4]);
            service
                .confirm_upload(self.owner_id, ticket.file_id)
                .await
                .unwrap()
        }

        async fn storage_key_of(&self, file_id: i64) -> String {
            let mut conn = self.db.acquire().await.unwrap();
            FileRepository::get_by_id(&mut conn, file_id)
                .await
                .unwrap()
                .unwrap()
                .storage_key
        }

        async fn used_bytes(&self) -> i64 {
            let mut conn = self.db.acquire().await.unwrap();
            quota::usage(&mut conn, self.project_id)
                .await
                .unwrap()
                .used_bytes
        }
    }

    async fn setup_with_quota(quota_mb: i64) -> Fixture {
        let db = Database::open_in_memory().await.unwrap();
        let (project_id, owner_id, editor_id, viewer_id) = {
            let mut conn = db.acquire().await.unwrap();
            let owner = UserRepository::create(&mut conn, &NewUser::new("owner").with_quota_mb(quota_mb))
                .await
                .unwrap();
            let editor = UserRepository::create(&mut conn, &NewUser::new("editor"))
                .await
                .unwrap();
            let viewer = UserRepository::create(&mut conn, &NewUser::new("viewer"))
                .await
                .unwrap();
            let project = ProjectRepository::create(&mut conn, "Game", owner.id)
                .await
                .unwrap();
            ProjectRepository::add_member(&mut conn, project.id, editor.id, ProjectRole::Editor)
                .await
                .unwrap();
            ProjectRepository::add_member(&mut conn, project.id, viewer.id, ProjectRole::Viewer)
                .await
                .unwrap();
            (project.id, owner.id, editor.id, viewer.id)
        };
        Fixture {
            db,
            storage: MemoryStorage::new(),
            project_id,
            owner_id,
            editor_id,
            viewer_id,
        }
    }

    async fn setup() -> Fixture {
        setup_with_quota(1024).await
    }

    #[tokio::test]
    async fn test_request_upload_issues_ticket() {
        let fx = setup().await;
        let ticket = fx
            .service()
            .request_upload(
                fx.editor_id,
                &UploadRequest::new(fx.project_id, "hero.png", "image/png", 1000),
            )
            .await
            .unwrap();

        assert_eq!(ticket.file_name, "hero.png");
        assert_eq!(ticket.path, "hero.png");
        assert!(ticket.upload_url.contains("method=PUT"));
        assert!(ticket.expires_at > Utc::now() + chrono::Duration::minutes(14));
        assert!(ticket.expires_at <= Utc::now() + chrono::Duration::minutes(15));

        let mut conn = fx.db.acquire().await.unwrap();
        let file = FileRepository::get_by_id(&mut conn, ticket.file_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(file.uploader_id, fx.editor_id);
    }

    #[tokio::test]
    async fn test_request_upload_validation_order() {
        let fx = setup().await;
        let service = fx.service();

        let denied = service
            .request_upload(
                fx.viewer_id,
                &UploadRequest::new(fx.project_id, "a.png", "text/plain", 0),
            )
            .await;
        assert!(matches!(denied, Err(VaultError::Permission(_))));

        let bad_type = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "a.txt", "text/plain", 10),
            )
            .await;
        assert!(matches!(bad_type, Err(VaultError::Validation(_))));

        let empty = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "a.png", "image/png", 0),
            )
            .await;
        assert!(matches!(empty, Err(VaultError::Validation(_))));

        let too_big = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "a.png", "image/png", MAX_FILE_SIZE + 1),
            )
            .await;
        assert!(matches!(too_big, Err(VaultError::Validation(_))));

        let exact = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "a.png", "IMAGE/PNG", MAX_FILE_SIZE),
            )
            .await;
        assert!(exact.is_ok());

        let bad_tags = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "b.png", "image/png", 10).with_tags(["no way"]),
            )
            .await;
        assert!(matches!(bad_tags, Err(VaultError::Validation(_))));

        let missing_dir = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "b.png", "image/png", 10).in_directory(9999),
            )
            .await;
        assert!(matches!(missing_dir, Err(VaultError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_quota_boundary() {
        let fx = setup_with_quota(5).await;
        {
            let mut conn = fx.db.acquire().await.unwrap();
            quota::charge(&mut conn, fx.project_id, 3 * BYTES_PER_MB)
                .await
                .unwrap();
        }
        let service = fx.service();

        let err = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "big.png", "image/png", 5 * BYTES_PER_MB),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::QuotaExceeded { .. }));
        assert!(err
            .to_string()
            .contains("Available: 2.00MB, Required: 5.00MB"));

        let over = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "over.png", "image/png", 2 * BYTES_PER_MB + 1),
            )
            .await;
        assert!(matches!(over, Err(VaultError::QuotaExceeded { .. })));

        let exact = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "fits.png", "image/png", 2 * BYTES_PER_MB),
            )
            .await;
        assert!(exact.is_ok());
    }

    #[tokio::test]
    async fn test_unique_names_against_confirmed_files() {
        let fx = setup().await;

        let first = fx
            .upload(UploadRequest::new(fx.project_id, "image.jpg", "image/jpeg", 10))
            .await;
        let second = fx
            .upload(UploadRequest::new(fx.project_id, "image.jpg", "image/jpeg", 10))
            .await;
        let third = fx
            .upload(UploadRequest::new(fx.project_id, "image.jpg", "image/jpeg", 10))
            .await;

        assert_eq!(first.file_name, "image.jpg");
        assert_eq!(second.file_name, "image (1).jpg");
        assert_eq!(third.file_name, "image (2).jpg");
    }

    #[tokio::test]
    async fn test_sanitized_name_in_directory() {
        let fx = setup().await;
        let dir = fx
            .directories()
            .create_directory(fx.owner_id, fx.project_id, "Icons", None)
            .await
            .unwrap();

        let file = fx
            .upload(
                UploadRequest::new(fx.project_id, "bad/name?.png", "image/png", 10)
                    .in_directory(dir.id),
            )
            .await;
        assert_eq!(file.file_name, "bad_name_.png");
        assert_eq!(file.path, "Icons/bad_name_.png");
        assert_eq!(file.directory_id, Some(dir.id));
    }

    #[tokio::test]
    async fn test_confirm_guards() {
        let fx = setup().await;
        let service = fx.service();
        let ticket = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "a.png", "image/png", 100),
            )
            .await
            .unwrap();

        let not_uploaded = service.confirm_upload(fx.owner_id, ticket.file_id).await;
        assert!(matches!(not_uploaded, Err(VaultError::Validation(_))));
        assert_eq!(fx.used_bytes().await, 0);

        fx.storage.put(fx.storage_key_of(ticket.file_id).await, b"png".to_vec());
        fx.storage.set_unavailable(true);
        let unavailable = service.confirm_upload(fx.owner_id, ticket.file_id).await;
        assert!(matches!(unavailable, Err(VaultError::Storage(_))));
        fx.storage.set_unavailable(false);

        let confirmed = service
            .confirm_upload(fx.viewer_id, ticket.file_id)
            .await
            .unwrap();
        assert!(confirmed.is_confirmed());
        assert_eq!(fx.used_bytes().await, 100);

        let twice = service.confirm_upload(fx.owner_id, ticket.file_id).await;
        assert!(matches!(twice, Err(VaultError::Validation(_))));
        assert_eq!(fx.used_bytes().await, 100);
    }

    #[tokio::test]
    async fn test_delete_quota_accounting() {
        let fx = setup().await;
        let service = fx.service();

        let confirmed = fx
            .upload(UploadRequest::new(fx.project_id, "a.png", "image/png", 300))
            .await;
        let pending = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "b.png", "image/png", 200),
            )
            .await
            .unwrap();
        assert_eq!(fx.used_bytes().await, 300);

        let denied = service.delete_file(fx.editor_id, confirmed.id).await;
        assert!(matches!(denied, Err(VaultError::Permission(_))));

        service.delete_file(fx.owner_id, pending.file_id).await.unwrap();
        assert_eq!(fx.used_bytes().await, 300);

        fx.storage.set_fail_deletes(true);
        service.delete_file(fx.owner_id, confirmed.id).await.unwrap();
        assert_eq!(fx.used_bytes().await, 0);

        // Already gone
        service.delete_file(fx.owner_id, confirmed.id).await.unwrap();
        assert_eq!(fx.used_bytes().await, 0);
    }

    #[tokio::test]
    async fn test_rename_file_keeps_extension_and_moves_blob() {
        let fx = setup().await;
        let service = fx.service();
        let file = fx
            .upload(UploadRequest::new(fx.project_id, "hero.png", "image/png", 10))
            .await;
        let old_key = file.storage_key.clone();

        let renamed = service
            .rename_file(fx.editor_id, file.id, "villain.jpg")
            .await
            .unwrap();
        assert_eq!(renamed.file_name, "villain.png");
        assert_eq!(renamed.path, "villain.png");
        assert_ne!(renamed.storage_key, old_key);
        assert!(fx.storage.contains(&renamed.storage_key));
        assert!(!fx.storage.contains(&old_key));

        let same = service
            .rename_file(fx.editor_id, file.id, "villain")
            .await
            .unwrap();
        assert_eq!(same, renamed);
    }

    #[tokio::test]
    async fn test_rename_file_conflicts_and_failures() {
        let fx = setup().await;
        let service = fx.service();
        let hero = fx
            .upload(UploadRequest::new(fx.project_id, "hero.png", "image/png", 10))
            .await;
        fx.upload(UploadRequest::new(fx.project_id, "villain.png", "image/png", 10))
            .await;

        let conflict = service.rename_file(fx.owner_id, hero.id, "villain").await;
        assert!(matches!(conflict, Err(VaultError::Conflict(_))));

        fx.storage.set_fail_copies(true);
        let failed = service.rename_file(fx.owner_id, hero.id, "sidekick").await;
        assert!(matches!(failed, Err(VaultError::Storage(_))));
        let unchanged = service.get_file(fx.owner_id, hero.id).await.unwrap();
        assert_eq!(unchanged.file_name, "hero.png");
        fx.storage.set_fail_copies(false);

        // Old blob delete failure is logged, not returned
        fx.storage.set_fail_deletes(true);
        let renamed = service
            .rename_file(fx.owner_id, hero.id, "sidekick")
            .await
            .unwrap();
        assert_eq!(renamed.file_name, "sidekick.png");
        assert!(fx.storage.contains(&hero.storage_key));
    }

    #[tokio::test]
    async fn test_pending_files_cannot_be_renamed_or_moved() {
        let fx = setup().await;
        let service = fx.service();
        let ticket = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "a.png", "image/png", 10),
            )
            .await
            .unwrap();

        let rename = service.rename_file(fx.owner_id, ticket.file_id, "b").await;
        assert!(matches!(rename, Err(VaultError::Validation(_))));
        let moved = service.move_file(fx.owner_id, ticket.file_id, None).await;
        assert!(matches!(moved, Err(VaultError::Validation(_))));
        let get = service.get_file(fx.owner_id, ticket.file_id).await;
        assert!(matches!(get, Err(VaultError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_move_file() {
        let fx = setup().await;
        let service = fx.service();
        let dir = fx
            .directories()
            .create_directory(fx.owner_id, fx.project_id, "Icons", None)
            .await
            .unwrap();
        let file = fx
            .upload(UploadRequest::new(fx.project_id, "a.png", "image/png", 10))
            .await;
        fx.upload(UploadRequest::new(fx.project_id, "b.png", "image/png", 10).in_directory(dir.id))
            .await;

        let moved = service
            .move_file(fx.owner_id, file.id, Some(dir.id))
            .await
            .unwrap();
        assert_eq!(moved.path, "Icons/a.png");
        assert_eq!(moved.storage_key, file.storage_key);

        let same = service
            .move_file(fx.owner_id, file.id, Some(dir.id))
            .await
            .unwrap();
        assert_eq!(same, moved);

        let other = fx
            .upload(UploadRequest::new(fx.project_id, "b.png", "image/png", 10))
            .await;
        let conflict = service.move_file(fx.owner_id, other.id, Some(dir.id)).await;
        assert!(matches!(conflict, Err(VaultError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_tags_and_listing() {
        let fx = setup().await;
        let service = fx.service();
        let hero = fx
            .upload(
                UploadRequest::new(fx.project_id, "hero.png", "image/png", 10)
                    .with_tags(["  CHARACTER  ", "Hero", "hero"]),
            )
            .await;
        assert_eq!(hero.tags, vec!["character", "hero"]);
        let villain = fx
            .upload(
                UploadRequest::new(fx.project_id, "villain.png", "image/png", 10)
                    .with_tags(["character"]),
            )
            .await;

        let tags = service.project_tags(fx.viewer_id, fx.project_id).await.unwrap();
        assert_eq!(tags, vec!["character", "hero"]);

        let all = service
            .list_files(
                fx.viewer_id,
                fx.project_id,
                &FileFilter::new().with_all_tags(vec!["HERO".to_string(), "character".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, hero.id);

        let updated = service
            .update_tags(fx.editor_id, villain.id, &["Boss".to_string(), "".to_string()])
            .await
            .unwrap();
        assert_eq!(updated.tags, vec!["boss"]);

        let tags = service.project_tags(fx.viewer_id, fx.project_id).await.unwrap();
        assert_eq!(tags, vec!["boss", "character", "hero"]);
    }

    #[tokio::test]
    async fn test_download_url_and_quota() {
        let fx = setup().await;
        let service = fx.service();
        let file = fx
            .upload(UploadRequest::new(fx.project_id, "hero.png", "image/png", 42))
            .await;

        let ticket = service.download_url(fx.viewer_id, file.id).await.unwrap();
        assert_eq!(ticket.file_name, "hero.png");
        assert!(ticket.download_url.contains("method=GET"));

        let usage = service.quota(fx.viewer_id, fx.project_id).await.unwrap();
        assert_eq!(usage.owner_id, fx.owner_id);
        assert_eq!(usage.used_bytes, 42);
    }

    #[tokio::test]
    async fn test_custom_policy() {
        let fx = setup().await;
        let policy = UploadPolicy {
            max_file_size: 100,
            allowed_content_types: vec!["image/png".to_string()],
            ..UploadPolicy::default()
        };
        let service = fx.service().with_policy(policy);

        let jpeg = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "a.jpg", "image/jpeg", 10),
            )
            .await;
        assert!(matches!(jpeg, Err(VaultError::Validation(_))));

        let big = service
            .request_upload(
                fx.owner_id,
                &UploadRequest::new(fx.project_id, "a.png", "image/png", 101),
            )
            .await;
        assert!(matches!(big, Err(VaultError::Validation(_))));
    }
}
