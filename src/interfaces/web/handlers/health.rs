use axum::{Json, extract::State};

use super::super::AppState;

pub async fn health_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let worker = state.supervisor.status().await;
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "mcp_ready": worker.ready,
        "environment": state.environment,
    }))
}
