//! User repository for assetvault.
//!
//! This module provides user creation and the quota counter updates.

use sqlx::SqliteConnection;

use super::user::{NewUser, User};
use crate::{Result, VaultError};

const USER_COLUMNS: &str = "id, username, storage_quota_mb, storage_used_bytes, created_at";

/// Repository for user operations.
pub struct UserRepository;

impl UserRepository {
    /// Create a new user in the database.
    pub async fn create(conn: &mut SqliteConnection, new_user: &NewUser) -> Result<User> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, storage_quota_mb) VALUES (?, ?) RETURNING id",
        )
        .bind(&new_user.username)
        .bind(new_user.storage_quota_mb)
        .fetch_one(&mut *conn)
        .await?;

        Self::get_by_id(conn, id)
            .await?
            .ok_or_else(|| VaultError::NotFound("user".to_string()))
    }

    /// Get a user by ID.
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(user)
    }

    /// Add confirmed bytes to a user's usage counter.
    pub async fn add_used_bytes(conn: &mut SqliteConnection, id: i64, bytes: i64) -> Result<()> {
        sqlx::query("UPDATE users SET storage_used_bytes = storage_used_bytes + ? WHERE id = ?")
            .bind(bytes)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Subtract released bytes from a user's usage counter, never below zero.
    pub async fn release_used_bytes(
        conn: &mut SqliteConnection,
        id: i64,
        bytes: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE users SET storage_used_bytes = MAX(storage_used_bytes - ?, 0) WHERE id = ?",
        )
        .bind(bytes)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
