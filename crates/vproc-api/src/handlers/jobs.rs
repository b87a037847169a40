//! Job submission handler.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use vproc_models::{AssetStatus, JobId, VideoAsset};

use crate::error::ApiResult;
use crate::producer::SubmitJob;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub status: AssetStatus,
    pub video: VideoAsset,
}

/// POST /api/jobs
///
/// Returns 202 once the job is durably queued; processing is reported via
/// `/api/progress/{job_id}`.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJob>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let video = state.producer.submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: video.id.clone(),
            status: video.status,
            video,
        }),
    ))
}
