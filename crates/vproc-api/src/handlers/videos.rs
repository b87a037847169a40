//! Video asset handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vproc_models::{AssetStatus, Rendition, VideoAsset};
use vproc_storage::keys;

use crate::error::{ApiError, ApiResult};
use crate::producer::parse_job_id;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ListVideosQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListVideosResponse {
    pub videos: Vec<VideoAsset>,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Serialize)]
pub struct VideoDetailResponse {
    pub video: VideoAsset,
    /// Highest bandwidth first
    pub renditions: Vec<Rendition>,
}

#[derive(Debug, Serialize)]
pub struct DeleteVideoResponse {
    pub deleted: bool,
    pub files_deleted: u32,
}

/// GET /api/videos - newest first.
pub async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<ListVideosQuery>,
) -> ApiResult<Json<ListVideosResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let videos = state.db.list_assets(limit, offset).await?;

    Ok(Json(ListVideosResponse {
        videos,
        limit,
        offset,
    }))
}

/// GET /api/videos/{id}
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<VideoDetailResponse>> {
    let id = parse_job_id(&video_id)?;

    let video = state
        .db
        .get_asset(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;
    let renditions = state.db.list_renditions(&id).await?;

    Ok(Json(VideoDetailResponse { video, renditions }))
}

/// DELETE /api/videos/{id}
///
/// Removes processed objects, then the record and its renditions. A video a
/// worker currently owns cannot be deleted.
pub async fn delete_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<DeleteVideoResponse>> {
    let id = parse_job_id(&video_id)?;

    let video = state
        .db
        .get_asset(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;

    if video.status == AssetStatus::Processing {
        return Err(ApiError::conflict("Video is being processed"));
    }

    let files_deleted = state
        .storage
        .delete_prefix(&keys::processed_prefix(id.as_str()))
        .await?;
    let deleted = state.db.delete_asset(&id).await?;

    info!(video_id = %id, files_deleted, "Deleted video");

    Ok(Json(DeleteVideoResponse {
        deleted,
        files_deleted,
    }))
}
