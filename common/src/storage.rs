use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{StorageBackend, StorageConfig};
use crate::{Error, Result};

/// Key/value object access shared by every layer of the pipeline. Keys are
/// `/`-separated and relative to the storage root.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()>;
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
    /// Every key under `prefix`, sorted.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
    async fn check_file_exists(&self, key: &str) -> Result<bool>;
    async fn delete_object(&self, key: &str) -> Result<()>;
    fn bucket(&self) -> &str;

    /// Deletes every key under `prefix` and returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.list_objects(prefix).await?;
        for key in &keys {
            self.delete_object(key).await?;
        }
        Ok(keys.len())
    }

    async fn prefix_exists(&self, prefix: &str) -> Result<bool> {
        Ok(!self.list_objects(prefix).await?.is_empty())
    }
}

/// [`ObjectStorage`] over any `object_store` backend.
pub struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStoreStorage {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
        }
    }

    pub fn local(root: &str) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = LocalFileSystem::new_with_prefix(root)?;
        Ok(Self::new(Arc::new(store), root))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory")
    }

    fn path(key: &str) -> Result<Path> {
        let clean = key.trim_matches('/');
        if clean.is_empty() {
            return Err(Error::InvalidInput("Object key must not be empty".to_string()));
        }
        Ok(Path::from(clean))
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreStorage {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = Self::path(key)?;
        debug!(key = %path, bytes = data.len(), "put object");
        self.store
            .put(&path, PutPayload::from(Bytes::copy_from_slice(data)))
            .await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = Self::path(key)?;
        let bytes = self.store.get(&path).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let clean = prefix.trim_matches('/');
        let prefix_path = if clean.is_empty() {
            None
        } else {
            Some(Path::from(clean))
        };

        let metas: Vec<_> = self
            .store
            .list(prefix_path.as_ref())
            .try_collect()
            .await?;

        let mut keys: Vec<String> = metas.into_iter().map(|m| m.location.to_string()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn check_file_exists(&self, key: &str) -> Result<bool> {
        let path = Self::path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let path = Self::path(key)?;
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Builds the configured storage backend.
pub fn build_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStorage>> {
    match config.backend {
        StorageBackend::Local => {
            info!(root = %config.local_root, "Using local filesystem storage");
            Ok(Arc::new(ObjectStoreStorage::local(&config.local_root)?))
        }
        StorageBackend::S3 => {
            let s3 = &config.s3;
            info!(endpoint = %s3.endpoint, bucket = %s3.bucket, "Using S3 storage");
            let store = AmazonS3Builder::new()
                .with_bucket_name(&s3.bucket)
                .with_region(&s3.region)
                .with_access_key_id(&s3.access_key)
                .with_secret_access_key(&s3.secret_key)
                .with_endpoint(&s3.endpoint)
                .with_allow_http(true)
                .build()?;
            Ok(Arc::new(ObjectStoreStorage::new(Arc::new(store), &s3.bucket)))
        }
    }
}

/// Joins key segments with `/`, ignoring empty ones.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
