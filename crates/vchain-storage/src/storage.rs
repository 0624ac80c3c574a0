//! Object storage seam used by the worker.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{public_url, R2Client};
use crate::error::{StorageError, StorageResult};
use crate::keys::validate_key;

/// Durable storage for finished artifacts.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` under `key` and return its public URL.
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String>;

    /// Remove `key`. Missing objects are not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}

#[async_trait]
impl ObjectStorage for R2Client {
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String> {
        validate_key(key)?;
        self.upload_bytes(data, key, content_type).await?;
        Ok(self.url_for(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.delete_object(key).await
    }
}

/// A stored object in [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// In-process [`ObjectStorage`] for tests and local runs.
#[derive(Debug)]
pub struct MemoryStorage {
    base_url: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_uploads_matching: Option<String>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("memory://bucket")
    }
}

impl MemoryStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(HashMap::new()),
            fail_uploads_matching: None,
        }
    }

    /// Make uploads whose key contains `fragment` fail.
    pub fn failing_uploads(mut self, fragment: impl Into<String>) -> Self {
        self.fail_uploads_matching = Some(fragment.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<String> {
        validate_key(key)?;
        if let Some(fragment) = &self.fail_uploads_matching {
            if key.contains(fragment.as_str()) {
                return Err(StorageError::upload_failed(format!("injected failure for {}", key)));
            }
        }
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::upload_failed("storage lock poisoned"))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(public_url(&self.base_url, key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::delete_failed("storage lock poisoned"))?;
        objects.remove(key);
        Ok(())
    }
}
