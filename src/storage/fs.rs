use async_trait::async_trait;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use url::Url;

use super::{validate_key, ObjectStore};
use crate::error::{StoreError, StoreResult};

/// Local filesystem object store.
///
/// Objects live at `<root>/<key>`; their URLs are `<base_url>/<key>`, where the base
/// defaults to the `file://` URL of the root directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    base_url: Url,
}

impl FsObjectStore {
    pub fn new(root: &Path, base_url: Option<Url>) -> StoreResult<Self> {
        // Ensure the directory exists before canonicalizing it
        std::fs::create_dir_all(root)?;
        let root = std::fs::canonicalize(root)?;

        let mut base_url = match base_url {
            Some(url) => url,
            None => Url::from_directory_path(&root).map_err(|_| {
                StoreError::Backend(format!("cannot build a URL for {}", root.display()))
            })?,
        };
        // Url::join replaces the last segment unless the base ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { root, base_url })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn object_url(&self, key: &str) -> StoreResult<String> {
        self.base_url
            .join(key)
            .map(String::from)
            .map_err(|e| StoreError::Backend(format!("cannot build URL for `{key}`: {e}")))
    }
}

/// Sibling of `path` that a put writes into before linking it into place
fn staging_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}

fn remove_if_present(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn write_staged(staging: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(staging)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Set once the future waiting on a put is dropped, e.g. by a timeout
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Write `bytes` to `path` through a staging file. Readers only ever see a
/// complete object, and nothing stays behind once the caller has given up.
fn put_blocking(path: &Path, bytes: &[u8], abandoned: &AtomicBool) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // No upsert: linking fails when the key already exists
    let staging = staging_path(path);
    let written = write_staged(&staging, bytes).and_then(|()| std::fs::hard_link(&staging, path));
    let cleaned = remove_if_present(&staging);
    written?;
    cleaned?;

    // Checked after the link, so a caller that gave up earlier never keeps the object
    if abandoned.load(Ordering::SeqCst) {
        remove_if_present(path)?;
        return Err(io::Error::new(ErrorKind::Interrupted, "write abandoned by its caller"));
    }
    Ok(())
}

async fn remove_file_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object(&self, key: &str, bytes: &[u8], content_type: &str) -> StoreResult<String> {
        let path = self.object_path(key)?;
        let owned = bytes.to_vec();

        // The write runs to completion on the blocking pool even when this
        // future is dropped; the flag tells it to remove what it wrote
        let abandoned = AbandonOnDrop(Arc::new(AtomicBool::new(false)));
        let flag = abandoned.0.clone();
        tokio::task::spawn_blocking(move || put_blocking(&path, &owned, &flag))
            .await
            .map_err(|e| StoreError::Backend(format!("write task failed: {e}")))??;

        tracing::debug!(key, content_type, size = bytes.len(), "object written");
        self.object_url(key)
    }

    async fn delete_objects(&self, keys: &[String]) -> StoreResult<()> {
        for key in keys {
            let path = self.object_path(key)?;
            if remove_file_if_present(&staging_path(&path)).await? {
                tracing::debug!(key = %key, "partial object removed");
            }
            if remove_file_if_present(&path).await? {
                tracing::debug!(key = %key, "object deleted");
            }
        }
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), None).unwrap();

        let url = store
            .put_object("u1/f1/1-abc.jpg", b"jpeg", "image/jpeg")
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("/u1/f1/1-abc.jpg"));
        assert_eq!(store.get_object("u1/f1/1-abc.jpg").await.unwrap(), b"jpeg");

        store.delete_objects(&["u1/f1/1-abc.jpg".to_string()]).await.unwrap();
        assert!(matches!(
            store.get_object("u1/f1/1-abc.jpg").await,
            Err(StoreError::NotFound)
        ));

        // Deleting again is fine
        store.delete_objects(&["u1/f1/1-abc.jpg".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_key_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), None).unwrap();

        store.put_object("a/b.png", b"first", "image/png").await.unwrap();
        assert!(store.put_object("a/b.png", b"second", "image/png").await.is_err());
        assert_eq!(store.get_object("a/b.png").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_put_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), None).unwrap();

        store.put_object("u/f/1-a.png", b"png", "image/png").await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path().join("u/f"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("1-a.png")]);
    }

    #[tokio::test]
    async fn test_delete_removes_interrupted_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), None).unwrap();

        // What a put dropped halfway through its write leaves behind
        let staging = staging_path(&store.root().join("u/f/1-a.png"));
        std::fs::create_dir_all(staging.parent().unwrap()).unwrap();
        std::fs::write(&staging, b"trunc").unwrap();
        assert!(matches!(
            store.get_object("u/f/1-a.png").await,
            Err(StoreError::NotFound)
        ));

        store.delete_objects(&["u/f/1-a.png".to_string()]).await.unwrap();
        assert!(!staging.exists());
    }

    #[test]
    fn test_abandoned_write_removes_its_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u/f/1-a.png");

        let err = put_blocking(&path, b"png", &AtomicBool::new(true)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert!(!path.exists());
        assert!(!staging_path(&path).exists());
    }

    #[tokio::test]
    async fn test_public_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let base = Url::parse("https://cdn.example.com/photos").unwrap();
        let store = FsObjectStore::new(dir.path(), Some(base)).unwrap();

        let url = store.put_object("u/f/x.jpg", b"x", "image/jpeg").await.unwrap();
        assert_eq!(url, "https://cdn.example.com/photos/u/f/x.jpg");
    }

    #[tokio::test]
    async fn test_escaping_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), None).unwrap();
        assert!(matches!(
            store.put_object("../outside.jpg", b"x", "image/jpeg").await,
            Err(StoreError::InvalidKey(_))
        ));
    }
}
