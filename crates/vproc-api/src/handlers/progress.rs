//! Progress snapshot and Server-Sent Events streams.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use vproc_models::{AssetStatus, JobId, ProgressEvent, VideoAsset};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::producer::parse_job_id;
use crate::state::AppState;

const PROGRESS_EVENT: &str = "progress";

/// GET /api/progress/{id}
///
/// Latest published event. Once the snapshot has expired the asset record
/// stands in for it.
pub async fn get_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ProgressEvent>> {
    let id = parse_job_id(&job_id)?;
    let current = current_progress(&state, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;
    Ok(Json(current))
}

/// GET /api/progress/{id}/stream
///
/// Sends the current state first, then live events, and closes after the
/// first terminal event.
pub async fn stream_job_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let id = parse_job_id(&job_id)?;

    // Subscribe before reading the snapshot so nothing falls in between
    let live = state.progress.subscribe(&id).await?;
    let current = current_progress(&state, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    debug!(job_id = %id, status = %current.status, "Opened progress stream");

    let events = until_terminal(stream::iter(Some(current)).chain(live));
    Ok(sse_response(&state, events, "job"))
}

/// GET /api/progress/stream
///
/// Every job's events. Stays open until the client goes away.
pub async fn stream_all_progress(
    State(state): State<AppState>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let live = state.progress.subscribe_all().await?;
    Ok(sse_response(&state, live, "all"))
}

/// Snapshot if present, otherwise an event synthesized from the record.
async fn current_progress(state: &AppState, id: &JobId) -> ApiResult<Option<ProgressEvent>> {
    match state.progress.get_snapshot(id).await {
        Ok(Some(snapshot)) => return Ok(Some(snapshot)),
        Ok(None) => {}
        Err(e) => warn!(job_id = %id, "Snapshot lookup failed, using asset record: {}", e),
    }

    Ok(state.db.get_asset(id).await?.map(|asset| event_from_asset(&asset)))
}

fn event_from_asset(asset: &VideoAsset) -> ProgressEvent {
    match asset.status {
        AssetStatus::Waiting => ProgressEvent::waiting(&asset.id),
        AssetStatus::Processing => ProgressEvent::processing(&asset.id, 0, "Processing"),
        AssetStatus::Completed => ProgressEvent::completed(&asset.id),
        AssetStatus::Failed => ProgressEvent::failed(
            &asset.id,
            0,
            asset
                .error_message
                .clone()
                .unwrap_or_else(|| "Processing failed".to_string()),
        ),
    }
}

/// Pass events through up to and including the first terminal one.
fn until_terminal<S>(events: S) -> impl Stream<Item = ProgressEvent>
where
    S: Stream<Item = ProgressEvent>,
{
    events.scan(false, |done, event| {
        if *done {
            return futures::future::ready(None);
        }
        *done = event.is_terminal();
        futures::future::ready(Some(event))
    })
}

fn sse_response<S>(
    state: &AppState,
    events: S,
    scope: &'static str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = ProgressEvent> + Send + 'static,
{
    let guard = StreamGuard::open(scope);
    let stream = events.take_until(state.shutdown_requested()).filter_map(move |event| {
        let _open = &guard;
        let sse = match Event::default().event(PROGRESS_EVENT).json_data(&event) {
            Ok(sse) => {
                metrics::record_sse_event(scope);
                Some(Ok(sse))
            }
            Err(e) => {
                warn!(job_id = %event.job_id, "Dropping unserializable progress event: {}", e);
                None
            }
        };
        futures::future::ready(sse)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Tracks an open stream for the active-streams gauge; dropped with the
/// stream when the client disconnects.
struct StreamGuard {
    scope: &'static str,
}

impl StreamGuard {
    fn open(scope: &'static str) -> Self {
        metrics::record_sse_opened(scope);
        Self { scope }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        metrics::record_sse_closed(self.scope);
    }
}
