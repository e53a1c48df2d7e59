use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use super::super::AppState;
use super::super::auth::AuthedUser;

/// `GET /api/mcp/status` — readiness of the shared tool worker.
pub async fn mcp_status_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.supervisor.status().await;
    Json(serde_json::json!({
        "ready": status.ready,
        "running": status.running,
        "pid": status.pid,
    }))
}

/// `POST /api/mcp/restart` — replace the worker, re-injecting the caller's
/// credentials (used after a token refresh).
pub async fn mcp_restart_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
) -> Response {
    match state.supervisor.restart(Some(&user.0)).await {
        Ok(()) => Json(serde_json::json!({ "ok": true, "message": "MCP worker restarted" }))
            .into_response(),
        Err(e) => {
            error!("Worker restart failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Failed to restart MCP worker" })),
            )
                .into_response()
        }
    }
}
