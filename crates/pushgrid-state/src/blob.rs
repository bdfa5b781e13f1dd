//! Blob storage for release artifacts, manifests and diff archives.
//!
//! The ledger and the differ only see [`BlobRef`]s; where the bytes live is
//! the store's concern. [`FsBlobStore`] serves blobs back through the
//! daemon's `/blobs/{id}` route, [`MemoryBlobStore`] is for tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::types::BlobRef;

pub type BlobResult<T> = Result<T, BlobError>;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob id: {0}")]
    InvalidId(String),

    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `id` and return a reference clients can download.
    async fn put(&self, id: &str, data: Bytes) -> BlobResult<BlobRef>;

    /// Fetch the bytes behind a reference previously returned by `put`.
    async fn get(&self, blob: &BlobRef) -> BlobResult<Bytes>;

    async fn delete(&self, blob: &BlobRef) -> BlobResult<()>;
}

/// Ids become file names, so they must be a single plain path segment.
fn validate_id(id: &str) -> BlobResult<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidId(id.to_string()))
    }
}

// ── Filesystem ─────────────────────────────────────────────────────

/// Stores each blob as a file under `root`; URLs point at
/// `{public_url}/blobs/{id}`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    url_prefix: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_url: &str) -> BlobResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            url_prefix: format!("{}/blobs/", public_url.trim_end_matches('/')),
        })
    }

    /// Read a blob by its id, as requested on the download route.
    pub async fn read(&self, id: &str) -> BlobResult<Bytes> {
        validate_id(id)?;
        match tokio::fs::read(self.root.join(id)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn id_from_url<'a>(&self, url: &'a str) -> BlobResult<&'a str> {
        url.strip_prefix(&self.url_prefix)
            .ok_or_else(|| BlobError::NotFound(url.to_string()))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, id: &str, data: Bytes) -> BlobResult<BlobRef> {
        validate_id(id)?;
        let size = data.len() as u64;
        tokio::fs::write(self.root.join(id), &data).await?;
        debug!(%id, size, "blob stored");
        Ok(BlobRef {
            url: format!("{}{id}", self.url_prefix),
            size,
        })
    }

    async fn get(&self, blob: &BlobRef) -> BlobResult<Bytes> {
        let id = self.id_from_url(&blob.url)?;
        self.read(id).await
    }

    async fn delete(&self, blob: &BlobRef) -> BlobResult<()> {
        let id = self.id_from_url(&blob.url)?;
        validate_id(id)?;
        match tokio::fs::remove_file(self.root.join(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ── In-memory ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, id: &str, data: Bytes) -> BlobResult<BlobRef> {
        validate_id(id)?;
        let url = format!("memory://{id}");
        let size = data.len() as u64;
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.insert(url.clone(), data);
        }
        Ok(BlobRef { url, size })
    }

    async fn get(&self, blob: &BlobRef) -> BlobResult<Bytes> {
        self.blobs
            .lock()
            .ok()
            .and_then(|blobs| blobs.get(&blob.url).cloned())
            .ok_or_else(|| BlobError::NotFound(blob.url.clone()))
    }

    async fn delete(&self, blob: &BlobRef) -> BlobResult<()> {
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.remove(&blob.url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "http://localhost:3000/").unwrap();

        let blob = store.put("abc123", Bytes::from_static(b"bundle")).await.unwrap();
        assert_eq!(blob.url, "http://localhost:3000/blobs/abc123");
        assert_eq!(blob.size, 6);
        assert_eq!(store.get(&blob).await.unwrap(), Bytes::from_static(b"bundle"));
        assert_eq!(store.read("abc123").await.unwrap().len(), 6);

        store.delete(&blob).await.unwrap();
        assert!(matches!(store.get(&blob).await, Err(BlobError::NotFound(_))));
        // Deleting twice is fine.
        store.delete(&blob).await.unwrap();
    }

    #[tokio::test]
    async fn fs_store_rejects_path_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path(), "http://localhost:3000").unwrap();
        assert!(matches!(
            store.put("../escape", Bytes::new()).await,
            Err(BlobError::InvalidId(_))
        ));
        assert!(matches!(store.read("..").await, Err(BlobError::InvalidId(_))));
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryBlobStore::new();
        let blob = store.put("x", Bytes::from_static(b"123")).await.unwrap();
        assert_eq!(blob.url, "memory://x");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&blob).await.unwrap().as_ref(), b"123");
        store.delete(&blob).await.unwrap();
        assert!(store.is_empty());
    }
}
