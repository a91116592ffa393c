use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::app_state::AppState;
use crate::db::queries;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
    pub jobs: BTreeMap<String, i64>,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub storage: ComponentHealth,
    pub queue: QueueHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct QueueHealth {
    pub status: String,
    pub depth: usize,
}

impl ComponentHealth {
    fn from_result<E>(result: Result<(), E>, start: std::time::Instant) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(_) => Self {
                status: "error".to_string(),
                latency_ms: None,
            },
        }
    }
}

/// GET /health - dependency status plus job counts per status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_start = std::time::Instant::now();
    let db_result = sqlx::query("SELECT 1").execute(&state.db).await.map(|_| ());
    let db_check = ComponentHealth::from_result(db_result, db_start);

    let storage_start = std::time::Instant::now();
    let storage_check =
        ComponentHealth::from_result(state.images.health_check().await, storage_start);

    let queue_check = QueueHealth {
        status: if state.queue.is_open() { "ok" } else { "error" }.to_string(),
        depth: state.queue.queue_depth(),
    };

    let jobs = match queries::count_jobs_by_status(&state.db).await {
        Ok(counts) => counts
            .into_iter()
            .map(|(status, n)| (status.to_string(), n))
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to count jobs for health check");
            BTreeMap::new()
        }
    };

    let all_healthy =
        db_check.status == "ok" && storage_check.status == "ok" && queue_check.status == "ok";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database: db_check,
            storage: storage_check,
            queue: queue_check,
        },
        jobs,
    };

    (status_code, Json(response))
}
