//! Test helpers for integration tests.
//!
//! Provides a `TestVault` holding an in-memory database, in-memory object
//! storage and a project with an owner, an editor and a viewer.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use assetvault::db::{NewUser, ProjectRepository, ProjectRole, UserRepository};
use assetvault::file::FileRepository;
use assetvault::{
    Database, DirectoryService, FileRecord, MemberAccess, MemoryStorage, PendingReaper,
    UploadRequest, UploadService,
};

/// Default owner quota in MB.
pub const DEFAULT_QUOTA_MB: i64 = 100;

/// A project with three members over fresh storage.
pub struct TestVault {
    pub db: Arc<Database>,
    pub storage: Arc<MemoryStorage>,
    pub project_id: i64,
    pub owner_id: i64,
    pub editor_id: i64,
    pub viewer_id: i64,
    pub outsider_id: i64,
}

impl TestVault {
    /// Create a vault whose owner has the default quota.
    pub async fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_MB).await
    }

    /// Create a vault whose owner has `quota_mb` megabytes of quota.
    pub async fn with_quota(quota_mb: i64) -> Self {
        let db = Database::open_in_memory()
            .await
            .expect("Failed to open test database");
        Self::seed(Arc::new(db), quota_mb).await
    }

    /// Create a vault over a database file in a temporary directory.
    ///
    /// The directory is removed when the returned `TempDir` is dropped.
    pub async fn on_disk() -> (TempDir, Self) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = Database::open(dir.path().join("vault.db"))
            .await
            .expect("Failed to open test database");
        let vault = Self::seed(Arc::new(db), DEFAULT_QUOTA_MB).await;
        (dir, vault)
    }

    /// Seed users and a project into an already opened database.
    pub async fn seed(db: Arc<Database>, quota_mb: i64) -> Self {
        let (project_id, owner_id, editor_id, viewer_id, outsider_id) = {
            let mut conn = db.acquire().await.unwrap();
            let owner =
                UserRepository::create(&mut conn, &NewUser::new("owner").with_quota_mb(quota_mb))
                    .await
                    .unwrap();
            let editor = UserRepository::create(&mut conn, &NewUser::new("editor"))
                .await
                .unwrap();
            let viewer = UserRepository::create(&mut conn, &NewUser::new("viewer"))
                .await
                .unwrap();
            let outsider = UserRepository::create(&mut conn, &NewUser::new("outsider"))
                .await
                .unwrap();
            let project = ProjectRepository::create(&mut conn, "Sprites", owner.id)
                .await
                .unwrap();
            ProjectRepository::add_member(&mut conn, project.id, editor.id, ProjectRole::Editor)
                .await
                .unwrap();
            ProjectRepository::add_member(&mut conn, project.id, viewer.id, ProjectRole::Viewer)
                .await
                .unwrap();
            (project.id, owner.id, editor.id, viewer.id, outsider.id)
        };

        Self {
            db,
            storage: Arc::new(MemoryStorage::new()),
            project_id,
            owner_id,
            editor_id,
            viewer_id,
            outsider_id,
        }
    }

    pub fn directories(&self) -> DirectoryService<'_> {
        DirectoryService::new(&self.db, &MemberAccess, self.storage.as_ref())
    }

    pub fn uploads(&self) -> UploadService<'_> {
        UploadService::new(&self.db, &MemberAccess, self.storage.as_ref())
    }

    pub fn reaper(&self) -> PendingReaper {
        PendingReaper::new(self.db.clone(), self.storage.clone())
    }

    /// Request an upload as the owner and return the pending file id.
    pub async fn request(&self, name: &str, directory_id: Option<i64>) -> i64 {
        let mut request = UploadRequest::new(self.project_id, name, "image/png", 1024);
        if let Some(directory_id) = directory_id {
            request = request.in_directory(directory_id);
        }
        self.uploads()
            .request_upload(self.owner_id, &request)
            .await
            .unwrap()
            .file_id
    }

    /// Put bytes at the storage key of a file, as the client would.
    pub async fn put_blob(&self, file_id: i64, data: &[u8]) {
        let key = self.file(file_id).await.storage_key;
        self.storage.put(key, data.to_vec());
    }

    /// Run a full upload (request, client PUT, confirm) of `request`.
    pub async fn upload_request(&self, request: UploadRequest) -> FileRecord {
        let uploads = self.uploads();
        let ticket = uploads
            .request_upload(self.owner_id, &request)
            .await
            .unwrap();
        self.put_blob(ticket.file_id, b"\x89PNG").await;
        uploads
            .confirm_upload(self.owner_id, ticket.file_id)
            .await
            .unwrap()
    }

    /// Upload and confirm a 1KB PNG named `name`.
    pub async fn upload(&self, name: &str, directory_id: Option<i64>) -> FileRecord {
        let mut request = UploadRequest::new(self.project_id, name, "image/png", 1024);
        if let Some(directory_id) = directory_id {
            request = request.in_directory(directory_id);
        }
        self.upload_request(request).await
    }

    /// Read a file record straight from the database.
    pub async fn file(&self, file_id: i64) -> FileRecord {
        self.try_file(file_id).await.expect("file should exist")
    }

    pub async fn try_file(&self, file_id: i64) -> Option<FileRecord> {
        let mut conn = self.db.acquire().await.unwrap();
        FileRepository::get_by_id(&mut conn, file_id).await.unwrap()
    }

    /// Current path of a file.
    pub async fn path_of(&self, file_id: i64) -> String {
        self.file(file_id).await.path
    }

    /// Bytes charged to the owner.
    pub async fn used_bytes(&self) -> i64 {
        self.uploads()
            .quota(self.owner_id, self.project_id)
            .await
            .unwrap()
            .used_bytes
    }

    /// Push the upload time of a file back by two days.
    pub async fn backdate(&self, file_id: i64) {
        sqlx::query("UPDATE files SET uploaded_at = datetime('now', '-2 days') WHERE id = ?")
            .bind(file_id)
            .execute(self.db.pool())
            .await
            .unwrap();
    }
}
