use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use super::super::AppState;
use super::super::auth::AuthedUser;

/// `GET /api/chat/{chat_id}` — one chat with its full message history.
pub async fn get_chat_endpoint(
    Path(chat_id): Path<String>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
) -> Response {
    let chat = match state.store.get_chat(&chat_id).await {
        Ok(Some(chat)) => chat,
        Ok(None) => return not_found(),
        Err(e) => return internal(e),
    };
    if chat.user_id != user.0 {
        return forbidden();
    }

    match state.store.list_messages(&chat_id).await {
        Ok(messages) => Json(serde_json::json!({
            "id": chat.id,
            "title": chat.title,
            "created_at": chat.created_at,
            "updated_at": chat.updated_at,
            "messages": messages,
        }))
        .into_response(),
        Err(e) => internal(e),
    }
}

/// `GET /api/chats` — the authenticated user's chats, most recent first.
pub async fn list_chats_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
) -> Response {
    match state.store.list_chats(&user.0).await {
        Ok(chats) => Json(serde_json::json!({ "chats": chats })).into_response(),
        Err(e) => internal(e),
    }
}

pub async fn delete_chat_endpoint(
    Path(chat_id): Path<String>,
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
) -> Response {
    let chat = match state.store.get_chat(&chat_id).await {
        Ok(Some(chat)) => chat,
        Ok(None) => return not_found(),
        Err(e) => return internal(e),
    };
    if chat.user_id != user.0 {
        return forbidden();
    }

    match state.store.delete_chat(&chat_id).await {
        Ok(_) => Json(serde_json::json!({ "message": "Chat deleted successfully" })).into_response(),
        Err(e) => internal(e),
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Chat not found" })),
    )
        .into_response()
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "error": "Access denied" })),
    )
        .into_response()
}

fn internal(e: anyhow::Error) -> Response {
    error!("Chat store failure: {:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Internal server error" })),
    )
        .into_response()
}
