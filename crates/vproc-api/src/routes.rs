//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::jobs::submit_job;
use crate::handlers::progress::{get_progress, stream_all_progress, stream_job_progress};
use crate::handlers::videos::{delete_video, get_video, list_videos};
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, request_id, request_logging};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let job_routes = Router::new().route("/jobs", post(submit_job));

    let video_routes = Router::new()
        .route("/videos", get(list_videos))
        .route("/videos/:video_id", get(get_video).delete(delete_video));

    let progress_routes = Router::new()
        .route("/progress/stream", get(stream_all_progress))
        .route("/progress/:job_id", get(get_progress))
        .route("/progress/:job_id/stream", get(stream_job_progress));

    let api_routes = Router::new()
        .merge(job_routes)
        .merge(video_routes)
        .merge(progress_routes)
        // Route layer so the middleware sees the matched template
        .route_layer(middleware::from_fn(metrics_middleware));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = match metrics_handle {
        Some(handle) => Router::new().route("/metrics", get(move || async move { handle.render() })),
        None => Router::new(),
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(request_logging))
        .layer(middleware::from_fn(request_id))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
