//! Blob storage of course attachments.
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;

pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("blob {0} not found")]
    NotFound(String),
    #[error("invalid blob path {0:?}")]
    InvalidPath(String),
    #[error("storage error: {0}")]
    Io(#[from] io::Error),
}

/// Stores blobs under relative, slash separated paths.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Stores `bytes` at `path`, replacing any previous blob, and returns the stored size.
    async fn put(&self, path: &str, bytes: Bytes) -> Result<u64, StorageError>;

    /// Streams the blob stored at `path`.
    async fn open(&self, path: &str) -> Result<ByteStream, StorageError>;

    async fn size(&self, path: &str) -> Result<u64, StorageError>;

    /// Removes the blob at `path`. Removing a missing blob succeeds.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;
}

/// Keeps blobs as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn not_found(path: &str) -> impl FnOnce(io::Error) -> StorageError + '_ {
    move |err| match err.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
        _ => StorageError::Io(err),
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn put(&self, path: &str, bytes: Bytes) -> Result<u64, StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&target).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        tracing::debug!(path, size = bytes.len(), "blob stored");
        Ok(bytes.len() as u64)
    }

    async fn open(&self, path: &str) -> Result<ByteStream, StorageError> {
        let file = tokio::fs::File::open(self.resolve(path)?)
            .await
            .map_err(not_found(path))?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        let metadata = tokio::fs::metadata(self.resolve(path)?)
            .await
            .map_err(not_found(path))?;
        Ok(metadata.len())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.resolve(path)?).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
            _ => {
                tracing::debug!(path, "blob removed");
                Ok(())
            }
        }
    }
}

/// Keeps blobs in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileStorage {
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl InMemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
    async fn put(&self, path: &str, bytes: Bytes) -> Result<u64, StorageError> {
        let size = bytes.len() as u64;
        self.blobs.write().await.insert(path.to_string(), bytes);
        Ok(size)
    }

    async fn open(&self, path: &str) -> Result<ByteStream, StorageError> {
        let bytes = self
            .blobs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        Ok(stream::once(async move { Ok(bytes) }).boxed())
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        self.blobs
            .read()
            .await
            .get(path)
            .map(|bytes| bytes.len() as u64)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.blobs.write().await.remove(path);
        Ok(())
    }
}

/// The content type of a file, from its extension.
pub fn content_type(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain; charset=utf-8",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn read_all(stream: ByteStream) -> Vec<u8> {
        stream
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn it_stores_and_streams_files_on_disk() {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(root.path());

        let size = storage
            .put("courses/c1/a1/guide.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();

        assert_eq!(size, 4);
        assert_eq!(storage.size("courses/c1/a1/guide.pdf").await.unwrap(), 4);
        let stream = storage.open("courses/c1/a1/guide.pdf").await.unwrap();
        assert_eq!(read_all(stream).await, b"%PDF");
    }

    #[tokio::test]
    async fn it_rejects_paths_escaping_the_root() {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(root.path());

        let result = storage.put("../outside", Bytes::from_static(b"x")).await;

        assert!(matches!(result, Err(StorageError::InvalidPath(_))));
        assert!(matches!(
            storage.open("/etc/passwd").await,
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn it_reports_missing_blobs() {
        let root = tempfile::tempdir().unwrap();

        assert!(matches!(
            LocalFileStorage::new(root.path()).open("missing.pdf").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            InMemoryFileStorage::new().size("missing.pdf").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn it_deletes_blobs_idempotently() {
        let root = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(root.path());
        storage
            .put("courses/c1/a1/guide.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();

        storage.delete("courses/c1/a1/guide.pdf").await.unwrap();
        storage.delete("courses/c1/a1/guide.pdf").await.unwrap();

        assert!(matches!(
            storage.size("courses/c1/a1/guide.pdf").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn it_keeps_blobs_in_memory() {
        let storage = InMemoryFileStorage::new();
        storage
            .put("a/b.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let stream = storage.open("a/b.txt").await.unwrap();
        assert_eq!(read_all(stream).await, b"hello");
    }

    #[test]
    fn it_infers_the_content_type_from_the_extension() {
        assert_eq!(content_type("Guide.PDF"), "application/pdf");
        assert_eq!(content_type("notes"), "application/octet-stream");
    }
}
