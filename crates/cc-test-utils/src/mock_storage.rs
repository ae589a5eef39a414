//! Mock object store for recording upload tests.
//!
//! ```rust,ignore
//! use cc_test_utils::FlakyObjectStore;
//!
//! // Two transient failures, then success
//! let store = FlakyObjectStore::new().fail_times(2);
//!
//! // Permanent rejection on every attempt
//! let store = FlakyObjectStore::new().reject_all();
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use conference_controller::recording::storage::{ObjectStore, StorageError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
}

/// Object store with scripted failures.
#[derive(Debug, Default)]
pub struct FlakyObjectStore {
    transient_failures: AtomicU32,
    reject: bool,
    delay: Option<Duration>,
    attempts: AtomicU32,
    objects: Mutex<Vec<StoredObject>>,
}

impl FlakyObjectStore {
    /// A store that accepts every upload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` uploads with a retryable error.
    #[must_use]
    pub fn fail_times(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Reject every upload with a permanent error.
    #[must_use]
    pub fn reject_all(mut self) -> Self {
        self.reject = true;
        self
    }

    /// Sleep before answering each upload.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `put_object` calls seen.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successfully stored objects, in upload order.
    #[must_use]
    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FlakyObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<u64, StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject {
            return Err(StorageError::Rejected("access denied".to_string()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Unavailable("503 slow down".to_string()));
        }

        let size = body.len() as u64;
        self.objects.lock().unwrap().push(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            body,
            content_type: content_type.to_string(),
        });
        Ok(size)
    }
}
