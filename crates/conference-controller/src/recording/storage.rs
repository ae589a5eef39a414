//! Object storage seam for recording uploads.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Transient failure. Retried.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Permanent failure (bad credentials, missing bucket). Not retried.
    #[error("storage rejected upload: {0}")]
    Rejected(String),
}

impl StorageError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

/// Minimal object store interface.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Store `body` under `bucket/key`, returning the stored size.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<u64, StorageError>;
}

/// Store that keeps objects in memory. Used by the binary when no external
/// store is wired and by tests.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), (Bytes, String)>>,
}

impl InMemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(body, _)| body.clone())
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::Rejected("bucket name is empty".to_string()));
        }
        let size = body.len() as u64;
        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            (body, content_type.to_string()),
        );
        Ok(size)
    }
}
