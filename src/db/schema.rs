//! Database schema and migrations for assetvault.
//!
//! This module contains all database migrations that will be applied
//! sequentially when the database is first opened or upgraded.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: Users with storage quota accounting
    r#"
CREATE TABLE users (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    username            TEXT NOT NULL UNIQUE,
    storage_quota_mb    INTEGER NOT NULL DEFAULT 1024,
    storage_used_bytes  INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
    // v2: Projects and memberships
    r#"
CREATE TABLE projects (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

-- role: 'viewer', 'editor', 'admin', 'owner'
CREATE TABLE project_members (
    project_id  INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role        TEXT NOT NULL DEFAULT 'viewer',
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (project_id, user_id)
);

CREATE INDEX idx_project_members_role ON project_members(project_id, role);
"#,
    // v3: Directory tree (parent-pointer rows)
    r#"
CREATE TABLE directories (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id  INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    parent_id   INTEGER REFERENCES directories(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Sibling names are unique; root-level siblings share parent 0
CREATE UNIQUE INDEX idx_directories_sibling_name
    ON directories(project_id, IFNULL(parent_id, 0), name);
CREATE INDEX idx_directories_parent_id ON directories(parent_id);
"#,
    // v4: File records and tags
    r#"
-- status: 'pending' until the client upload is verified, then 'confirmed'
CREATE TABLE files (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id    INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    directory_id  INTEGER REFERENCES directories(id) ON DELETE CASCADE,
    file_name     TEXT NOT NULL,
    path          TEXT NOT NULL,
    content_type  TEXT NOT NULL,
    size          INTEGER NOT NULL,
    status        TEXT NOT NULL DEFAULT 'pending',
    storage_key   TEXT NOT NULL DEFAULT '',
    uploader_id   INTEGER NOT NULL REFERENCES users(id),
    uploaded_at   TEXT NOT NULL DEFAULT (datetime('now')),
    confirmed_at  TEXT
);

CREATE INDEX idx_files_project_path ON files(project_id, path);
CREATE INDEX idx_files_directory_id ON files(directory_id);
CREATE INDEX idx_files_status_uploaded_at ON files(status, uploaded_at);

CREATE TABLE file_tags (
    file_id  INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    tag      TEXT NOT NULL,
    PRIMARY KEY (file_id, tag)
);

CREATE INDEX idx_file_tags_tag ON file_tags(tag);
"#,
];
