//! S3-compatible storage gateway built on the `object_store` crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::ObjectStore;
use tracing::debug;

use super::storage::StorageGateway;
use crate::config::StorageConfig;
use crate::{Result, VaultError};

/// Gateway over any `ObjectStore` with a matching URL signer.
#[derive(Debug, Clone)]
pub struct ObjectStoreGateway {
    store: Arc<dyn ObjectStore>,
    signer: Arc<dyn Signer>,
}

impl ObjectStoreGateway {
    /// Create a gateway from a store and the signer for the same bucket.
    pub fn new(store: Arc<dyn ObjectStore>, signer: Arc<dyn Signer>) -> Self {
        Self { store, signer }
    }

    /// Build an S3 (or S3-compatible) gateway from configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(VaultError::Config(
                "storage.bucket is required for the s3 backend".to_string(),
            ));
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(config.allow_http);

        if let Some(ref endpoint) = config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(ref access_key_id) = config.access_key_id {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(ref secret_access_key) = config.secret_access_key {
            builder = builder.with_secret_access_key(secret_access_key);
        }

        let s3 = Arc::new(
            builder
                .build()
                .map_err(|e| VaultError::Config(format!("failed to build S3 store: {e}")))?,
        );
        debug!("Built S3 storage gateway for bucket {}", config.bucket);
        Ok(Self::new(s3.clone(), s3))
    }

    async fn sign(&self, method: Method, key: &str, expires_in: Duration) -> Result<String> {
        let url = self
            .signer
            .signed_url(method, &ObjectPath::from(key), expires_in)
            .await?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl StorageGateway for ObjectStoreGateway {
    /// The content type and size are enforced when the upload is confirmed,
    /// not by the signature.
    async fn upload_url(
        &self,
        key: &str,
        _content_type: &str,
        _size: i64,
        expires_in: Duration,
    ) -> Result<String> {
        self.sign(Method::PUT, key, expires_in).await
    }

    /// S3 query signing cannot carry a content disposition, so the display
    /// name is not applied.
    async fn download_url(
        &self,
        key: &str,
        _display_name: &str,
        expires_in: Duration,
    ) -> Result<String> {
        self.sign(Method::GET, key, expires_in).await
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        self.store
            .copy(&ObjectPath::from(from), &ObjectPath::from(to))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.store.delete(&ObjectPath::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&ObjectPath::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
