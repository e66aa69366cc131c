//! Archive Uploader
//!
//! Thin wrapper over the object store for the two uploads the archive
//! writer performs per rotation: the finished temp file and the JSON
//! manifest. Keeping it separate from the store gives tests a single seam
//! for observing what reached the bucket.

use std::path::Path as FsPath;
use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::info;

use crate::error::Result;

/// Uploads local files and in-memory buffers to the archive bucket.
pub struct ArchiveUploader {
    store: Arc<dyn ObjectStore>,
}

impl ArchiveUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    /// Upload a local file under the given key.
    pub async fn upload_file(&self, file: &FsPath, key: &str) -> Result<()> {
        let data = tokio::fs::read(file).await?;
        info!(file = %file.display(), key, bytes = data.len(), "uploading archive");
        self.store.put(&Path::from(key), Bytes::from(data)).await?;
        info!(key, "completed upload");
        Ok(())
    }

    /// Upload an in-memory buffer under the given key.
    pub async fn upload_data(&self, data: Bytes, key: &str) -> Result<()> {
        info!(key, bytes = data.len(), "uploading");
        self.store.put(&Path::from(key), data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn test_upload_data_lands_under_key() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let uploader = ArchiveUploader::new(store.clone());

        uploader
            .upload_data(Bytes::from_static(b"payload"), "20200101/s-c-1.tri")
            .await
            .unwrap();

        let body = store
            .get(&Path::from("20200101/s-c-1.tri"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_upload_file_roundtrips_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.tri");
        std::fs::write(&path, b"file-bytes").unwrap();

        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let uploader = ArchiveUploader::new(store.clone());
        uploader.upload_file(&path, "k").await.unwrap();

        let body = store.get(&Path::from("k")).await.unwrap().bytes().await.unwrap();
        assert_eq!(body, Bytes::from_static(b"file-bytes"));
    }
}
