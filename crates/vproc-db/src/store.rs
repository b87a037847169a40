//! Metadata store seam.

use async_trait::async_trait;

use vproc_models::{AssetStatus, JobId, Rendition, VideoAsset};

use crate::error::DbResult;

/// CRUD on video assets and renditions.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert the asset unless one with the same id exists.
    /// Returns whether a row was inserted.
    async fn create_asset(&self, asset: &VideoAsset) -> DbResult<bool>;

    async fn get_asset(&self, id: &JobId) -> DbResult<Option<VideoAsset>>;

    /// Newest first.
    async fn list_assets(&self, limit: u32, offset: u32) -> DbResult<Vec<VideoAsset>>;

    /// Set the status. `completed_at` is stamped only for `Completed` and
    /// `error_message` is kept only for `Failed`; both are cleared otherwise.
    async fn update_status(
        &self,
        id: &JobId,
        status: AssetStatus,
        error: Option<&str>,
    ) -> DbResult<()>;

    async fn update_source_info(
        &self,
        id: &JobId,
        width: u32,
        height: u32,
        duration_seconds: f64,
    ) -> DbResult<()>;

    async fn set_master_manifest(
        &self,
        id: &JobId,
        location: &str,
        url: Option<&str>,
    ) -> DbResult<()>;

    /// Insert or overwrite the rendition with the same `(video_id, label)`.
    async fn upsert_rendition(&self, rendition: &Rendition) -> DbResult<()>;

    /// Descending bandwidth, then descending height.
    async fn list_renditions(&self, video_id: &JobId) -> DbResult<Vec<Rendition>>;

    /// Delete the asset and its renditions. Returns whether it existed.
    async fn delete_asset(&self, id: &JobId) -> DbResult<bool>;
}
