//! Object storage gateway.
//!
//! File bytes never pass through this crate. The gateway hands out presigned
//! URLs for clients to upload and download directly, and performs the few
//! server-side blob operations the lifecycle needs (copy, delete, exists).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::{Result, VaultError};

/// Operations on opaque storage keys.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Presigned URL the client uses to PUT the blob.
    async fn upload_url(
        &self,
        key: &str,
        content_type: &str,
        size: i64,
        expires_in: Duration,
    ) -> Result<String>;

    /// Presigned URL the client uses to GET the blob, suggesting
    /// `display_name` as the download file name where the backend supports it.
    async fn download_url(&self, key: &str, display_name: &str, expires_in: Duration)
        -> Result<String>;

    /// Server-side copy of a blob to a new key.
    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Delete a blob. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether a blob exists under the key.
    async fn exists(&self, key: &str) -> Result<bool>;
}

const MEMORY_BASE_URL: &str = "memory://assetvault/";

/// In-process storage for development and tests.
///
/// URLs it issues are not fetchable; tests play the client by calling
/// [`MemoryStorage::put`] directly. Failures can be injected per operation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_deletes: AtomicBool,
    fail_copies: AtomicBool,
    unavailable: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob, as a client upload would.
    pub fn put(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), data.into());
    }

    /// Get a copy of a blob.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Whether a blob exists.
    pub fn contains(&self, key: &str) -> bool {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every delete fail.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Make every copy fail.
    pub fn set_fail_copies(&self, fail: bool) {
        self.fail_copies.store(fail, Ordering::SeqCst);
    }

    /// Make every operation fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(VaultError::Storage("storage unavailable".to_string()));
        }
        Ok(())
    }

    fn url_for(&self, key: &str, pairs: &[(&str, String)]) -> Result<String> {
        let mut url = Url::parse(MEMORY_BASE_URL)
            .and_then(|base| base.join(key))
            .map_err(|e| VaultError::Storage(format!("invalid storage key {key}: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in pairs {
                query.append_pair(name, value);
            }
        }
        Ok(url.to_string())
    }
}

#[async_trait]
impl StorageGateway for MemoryStorage {
    async fn upload_url(
        &self,
        key: &str,
        content_type: &str,
        size: i64,
        expires_in: Duration,
    ) -> Result<String> {
        self.check_available()?;
        self.url_for(
            key,
            &[
                ("method", "PUT".to_string()),
                ("content-type", content_type.to_string()),
                ("content-length", size.to_string()),
                ("expires", expires_in.as_secs().to_string()),
            ],
        )
    }

    async fn download_url(
        &self,
        key: &str,
        display_name: &str,
        expires_in: Duration,
    ) -> Result<String> {
        self.check_available()?;
        self.url_for(
            key,
            &[
                ("method", "GET".to_string()),
                (
                    "response-content-disposition",
                    format!("attachment; filename=\"{display_name}\""),
                ),
                ("expires", expires_in.as_secs().to_string()),
            ],
        )
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.check_available()?;
        if self.fail_copies.load(Ordering::SeqCst) {
            return Err(VaultError::Storage(format!("copy of {from} failed")));
        }

        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        let data = blobs
            .get(from)
            .cloned()
            .ok_or_else(|| VaultError::Storage(format!("source blob {from} does not exist")))?;
        blobs.insert(to.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(VaultError::Storage(format!("delete of {key} failed")));
        }
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.contains(key))
    }
}
