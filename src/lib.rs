//! assetvault - per-project asset storage
//!
//! A virtual directory tree per project, backed by SQLite, with a two-phase
//! upload lifecycle gated by the project owner's storage quota. File bytes go
//! directly between clients and object storage through presigned URLs.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod file;
pub mod logging;

pub use auth::{AccessControl, MemberAccess};
pub use config::Config;
pub use db::{Database, NewUser, Project, ProjectRepository, ProjectRole, User, UserRepository};
pub use error::{DirectoryConflict, Result, VaultError};
pub use file::{
    start_reaper, Directory, DirectoryScope, DirectoryService, DownloadTicket, FileFilter,
    FileRecord, FileStatus, MemoryStorage, ObjectStoreGateway, PendingReaper, QuotaUsage,
    StorageGateway, SweepReport, TagMatch, UploadPolicy, UploadRequest, UploadService,
    UploadTicket,
};
