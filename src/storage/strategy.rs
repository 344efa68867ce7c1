use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;

use super::{ObjectStore, PhotoSource, PhotoStorage, StorageStrategy};
use crate::error::{StoreError, StoreResult};
use crate::state::data::PhotoPayload;

/// Writes photo bytes to an object store and records the returned URL
pub struct ExternalObjectStorage {
    objects: Arc<dyn ObjectStore>,
}

impl ExternalObjectStorage {
    pub fn new(objects: Arc<dyn ObjectStore>) -> Self {
        Self { objects }
    }
}

#[async_trait]
impl PhotoStorage for ExternalObjectStorage {
    fn strategy(&self) -> StorageStrategy {
        StorageStrategy::ExternalObject
    }

    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> StoreResult<PhotoPayload> {
        let url = self.objects.put_object(key, bytes, content_type).await?;
        Ok(PhotoPayload::External {
            key: key.to_string(),
            url,
        })
    }

    async fn discard(&self, payloads: &[PhotoPayload]) -> StoreResult<()> {
        let keys: Vec<String> = payloads
            .iter()
            .filter_map(|payload| payload.object_key().map(str::to_string))
            .collect();

        if keys.is_empty() {
            return Ok(());
        }
        self.objects.delete_objects(&keys).await
    }

    async fn abandon(&self, key: &str) -> StoreResult<()> {
        self.objects.delete_objects(&[key.to_string()]).await
    }

    async fn resolve(&self, payload: &PhotoPayload) -> StoreResult<PhotoSource> {
        match payload {
            PhotoPayload::External { url, .. } => Ok(PhotoSource::Url(url.clone())),
            PhotoPayload::Inline { data } => Ok(PhotoSource::Bytes(STANDARD.decode(data)?)),
        }
    }

    async fn fetch(&self, payload: &PhotoPayload) -> StoreResult<Vec<u8>> {
        match payload {
            PhotoPayload::External { key, .. } => self.objects.get_object(key).await,
            PhotoPayload::Inline { data } => Ok(STANDARD.decode(data)?),
        }
    }
}

/// Keeps photo bytes in the record as base64; no object store involved
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineBlobStorage;

#[async_trait]
impl PhotoStorage for InlineBlobStorage {
    fn strategy(&self) -> StorageStrategy {
        StorageStrategy::InlineBlob
    }

    async fn put(&self, _key: &str, bytes: &[u8], _content_type: &str) -> StoreResult<PhotoPayload> {
        Ok(PhotoPayload::Inline {
            data: STANDARD.encode(bytes),
        })
    }

    async fn discard(&self, _payloads: &[PhotoPayload]) -> StoreResult<()> {
        // Inline bytes disappear with their record
        Ok(())
    }

    async fn abandon(&self, _key: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn resolve(&self, payload: &PhotoPayload) -> StoreResult<PhotoSource> {
        match payload {
            PhotoPayload::Inline { data } => Ok(PhotoSource::Bytes(STANDARD.decode(data)?)),
            PhotoPayload::External { url, .. } => Ok(PhotoSource::Url(url.clone())),
        }
    }

    async fn fetch(&self, payload: &PhotoPayload) -> StoreResult<Vec<u8>> {
        match payload {
            PhotoPayload::Inline { data } => Ok(STANDARD.decode(data)?),
            PhotoPayload::External { key, .. } => Err(StoreError::Backend(format!(
                "object `{key}` is external but this deployment stores photos inline"
            ))),
        }
    }
}
