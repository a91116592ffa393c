pub mod face_swap;
pub mod health;
pub mod metrics;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use self::metrics::MetricsState;

/// Routes served by the API process, minus the metrics endpoint.
///
/// Upload size is enforced per route by `DefaultBodyLimit`, so an oversized
/// submission surfaces as a JSON `PAYLOAD_TOO_LARGE` error from the handler.
pub fn api_router(state: AppState, max_upload_bytes: usize) -> Router {
    let images = ServeDir::new(state.images.root());

    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/face-swap/jobs",
            post(face_swap::create_job).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/api/v1/face-swap/jobs/{reference_id}",
            get(face_swap::get_job),
        )
        .nest_service("/static/images", images)
        .with_state(state)
}

/// Full application: API routes, `/metrics` and the middleware stack.
///
/// Layers apply bottom-up: set request id, propagate request id, tracing,
/// CORS, compression. Propagation sits directly inside the layer that sets
/// the id, so every response, including ones produced by inner layers,
/// carries `x-request-id`.
pub fn app(state: AppState, metrics_state: MetricsState, max_upload_bytes: usize) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");

    api_router(state, max_upload_bytes)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
}
