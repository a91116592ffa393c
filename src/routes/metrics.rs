use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::JobQueue;

/// State for the scrape endpoint, kept apart from [`crate::app_state::AppState`].
#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: Arc<JobQueue>,
}

/// GET /metrics - Prometheus text exposition.
///
/// The queue-depth gauge is refreshed on every scrape because workers drain
/// the channel without touching the recorder.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    metrics::gauge!("face_swap_queue_depth").set(state.queue.queue_depth() as f64);
    state.handle.render()
}
