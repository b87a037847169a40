//! Filesystem-backed object store.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::store::{ObjectStore, PutBody, StoredObject};

/// Stores objects as files under a root directory. "Presigned" URLs are
/// absolute file paths.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path under the root, rejecting escapes.
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

async fn count_files(dir: &Path) -> StorageResult<u32> {
    let mut count = 0;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                stack.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, body: PutBody, _content_type: &str) -> StorageResult<StoredObject> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let size_bytes = match body {
            PutBody::File(src) => tokio::fs::copy(&src, &dest)
                .await
                .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)))?,
            PutBody::Bytes(data) => {
                tokio::fs::write(&dest, &data)
                    .await
                    .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)))?;
                data.len() as u64
            }
        };

        debug!("Stored {} ({} bytes)", key, size_bytes);
        Ok(StoredObject {
            location: key.to_string(),
            size_bytes,
        })
    }

    async fn presign_get(&self, key: &str, _expires_in: Duration) -> StorageResult<String> {
        let path = self.path_for(key)?;
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(absolute.to_string_lossy().to_string())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32> {
        let path = self.path_for(prefix.trim_end_matches('/'))?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                let count = count_files(&path).await?;
                tokio::fs::remove_dir_all(&path)
                    .await
                    .map_err(|e| StorageError::delete_failed(e.to_string()))?;
                Ok(count)
            }
            Ok(_) => {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| StorageError::delete_failed(e.to_string()))?;
                Ok(1)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}
