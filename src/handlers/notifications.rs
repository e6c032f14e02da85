use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::AppState;

/// Webhook entry point. Providers only need acknowledgement, so anything
/// that parses as a delivery for a known, verified source answers 200 with
/// the conventional `[OK]` body; everything else is forbidden.
pub async fn receive_notification(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: String,
) -> impl IntoResponse {
    let source = connect_info.map(|ConnectInfo(addr)| addr.ip());
    if state.notifications.handle(source, &gateway, &payload).await {
        (StatusCode::OK, "[OK]")
    } else {
        (StatusCode::FORBIDDEN, "")
    }
}
