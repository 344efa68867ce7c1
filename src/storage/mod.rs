//! Binary storage for photo content
//!
//! - `ObjectStore`: the raw key/bytes store (filesystem backed in `fs.rs`)
//! - `PhotoStorage`: the per-deployment representation strategy (`strategy.rs`),
//!   either external objects or inline base64 blobs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::state::data::PhotoPayload;

pub mod fs;
pub mod strategy;

pub use fs::FsObjectStore;
pub use strategy::{ExternalObjectStorage, InlineBlobStorage};

/// Which photo representation a deployment writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageStrategy {
    /// Bytes in the object store, URL in the record
    #[default]
    ExternalObject,
    /// Base64 bytes in the record itself
    InlineBlob,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return the URL the object is reachable at.
    /// Existing keys are never overwritten. A put that fails or is dropped
    /// midway may leave data behind; `delete_objects` on the same key removes it.
    async fn put_object(&self, key: &str, bytes: &[u8], content_type: &str) -> StoreResult<String>;

    /// Delete every key; keys that are already gone are not an error
    async fn delete_objects(&self, keys: &[String]) -> StoreResult<()>;

    async fn get_object(&self, key: &str) -> StoreResult<Vec<u8>>;
}

/// A resolved photo, ready to display or download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoSource {
    Url(String),
    Bytes(Vec<u8>),
}

#[async_trait]
pub trait PhotoStorage: Send + Sync {
    fn strategy(&self) -> StorageStrategy;

    /// Persist `bytes` and return the payload to record. `key` is only used by
    /// strategies that write to an object store.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> StoreResult<PhotoPayload>;

    /// Release whatever `put` allocated for these payloads
    async fn discard(&self, payloads: &[PhotoPayload]) -> StoreResult<()>;

    /// Remove anything a failed or interrupted `put` under `key` may have left.
    /// Nothing left behind is not an error.
    async fn abandon(&self, key: &str) -> StoreResult<()>;

    /// A URL when one exists, the bytes otherwise
    async fn resolve(&self, payload: &PhotoPayload) -> StoreResult<PhotoSource>;

    /// The stored bytes, regardless of representation
    async fn fetch(&self, payload: &PhotoPayload) -> StoreResult<Vec<u8>>;
}

/// Bound a store call by `limit`; an elapsed deadline becomes [`StoreError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

/// Reject keys that are absolute or could escape the store root
pub fn validate_key(key: &str) -> StoreResult<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");

    if invalid {
        Err(StoreError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("owner/folder/1700000000000-abc123.jpg").is_ok());
        for bad in ["", "/etc/passwd", "a/../b", "a//b", "./a", "a\\b", "a/"] {
            assert!(validate_key(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_with_timeout_reports_limit() {
        let limit = Duration::from_millis(10);
        let result: StoreResult<()> = with_timeout(limit, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(StoreError::Timeout(d)) if d == limit));
    }
}
