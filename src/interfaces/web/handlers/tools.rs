use axum::Json;

use crate::core::tools::builtin_tools;

/// `GET /api/tools` — the tool catalog users can enable per chat.
pub async fn get_tools_endpoint() -> Json<serde_json::Value> {
    let tools: Vec<serde_json::Value> = builtin_tools()
        .into_iter()
        .map(|t| {
            serde_json::json!({
                "function": {
                    "name": t.name,
                    "description": t.description,
                }
            })
        })
        .collect();

    Json(serde_json::json!({ "tools": tools }))
}
