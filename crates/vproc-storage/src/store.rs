//! Object store seam.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Body of a put.
#[derive(Debug, Clone)]
pub enum PutBody {
    /// Streamed from a local file
    File(PathBuf),
    /// Held in memory
    Bytes(Vec<u8>),
}

/// Where an object landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object key within the store
    pub location: String,
    pub size_bytes: u64,
}

/// Byte sink returning locations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing any existing object.
    async fn put(&self, key: &str, body: PutBody, content_type: &str) -> StorageResult<StoredObject>;

    /// Time-limited read URL for `key`.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    /// Delete every object under `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u32>;

    /// Cheap reachability probe.
    async fn check_connectivity(&self) -> StorageResult<()>;
}

/// Key layout for processed output.
pub mod keys {
    /// Presigned URLs for processed output stay valid this long.
    pub const PRESIGN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

    /// Prefix holding every processed object of a video.
    pub fn processed_prefix(video_id: &str) -> String {
        format!("{}/processed/", video_id)
    }

    /// Key of one rendition file.
    pub fn rendition_file(video_id: &str, label: &str, file: &str) -> String {
        format!("{}/processed/{}/{}", video_id, label, file)
    }

    /// Key of the master manifest.
    pub fn master_manifest(video_id: &str) -> String {
        format!("{}/processed/master.m3u8", video_id)
    }

}
