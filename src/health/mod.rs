//! Liveness and readiness probes.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/detailed", get(detailed))
}

async fn liveness() -> &'static str {
    "OK"
}

/// Readiness: the database must answer a ping and the executor queue must be
/// below its backlog threshold, otherwise 503.
async fn detailed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database_ok = state.db.ping().await.is_ok();
    let executor_ok = state.executor.is_healthy();
    let healthy = database_ok && executor_ok;

    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "database": { "healthy": database_ok },
        "executor": {
            "healthy": executor_ok,
            "queue_depth": state.executor.queue_depth(),
            "workers": state.executor.worker_count(),
        },
        "capture_queue_size": state.metrics.capture_queue_size.load(Ordering::Relaxed),
        "timestamp": Utc::now().to_rfc3339(),
    });
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
