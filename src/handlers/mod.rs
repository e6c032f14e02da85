//! Thin axum layer mapping HTTP to the services and back.

pub mod charges;
pub mod notifications;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/charges", post(charges::create_charge))
        .route("/v1/charges/:external_id", get(charges::get_charge))
        .route("/v1/charges/:external_id/status", put(charges::update_status))
        .route("/v1/charges/:external_id/authorise", post(charges::authorise))
        .route("/v1/charges/:external_id/capture", post(charges::capture))
        .route("/v1/charges/:external_id/cancel", post(charges::cancel))
        .route(
            "/v1/charges/:external_id/refunds",
            post(charges::submit_refund).get(charges::list_refunds),
        )
        .route(
            "/v1/charges/:external_id/refunds/:refund_external_id",
            get(charges::get_refund),
        )
        .route("/v1/charges/:external_id/events", get(charges::list_events))
        .route(
            "/v1/notifications/:gateway",
            post(notifications::receive_notification),
        )
        .route("/metrics", get(render_metrics))
}

async fn render_metrics(State(state): State<Arc<AppState>>) -> String {
    state
        .metrics
        .render_prometheus(state.executor.queue_depth())
}
