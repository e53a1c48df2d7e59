use axum::{
    Extension, Json,
    extract::{FromRequest, Multipart, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{error, info};

use super::super::AppState;
use super::super::auth::AuthedUser;
use crate::core::chat::{ChatTurnRequest, DEFAULT_MODEL, UploadedFile};
use crate::core::error::ChatError;

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ChatBody {
    message: Option<String>,
    chat_id: Option<String>,
    model: Option<String>,
    enabled_tools: Vec<String>,
}

/// `POST /api/chat`. Accepts either a JSON body (no attachments) or a
/// multipart form with up to 5 `attachments` parts alongside the same fields.
pub async fn chat_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    req: Request,
) -> Response {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let (body, files) = if content_type.starts_with("multipart/form-data") {
        match Multipart::from_request(req, &state).await {
            Ok(multipart) => match read_multipart(multipart).await {
                Ok(parsed) => parsed,
                Err(e) => return bad_request(&e),
            },
            Err(e) => return bad_request(&e.to_string()),
        }
    } else {
        match Json::<ChatBody>::from_request(req, &state).await {
            Ok(Json(body)) => (body, Vec::new()),
            Err(e) => return bad_request(&e.to_string()),
        }
    };

    info!(
        "Chat request: chat_id={:?} files={}",
        body.chat_id,
        files.len()
    );

    let turn = ChatTurnRequest {
        user_id: user.0,
        chat_id: body.chat_id,
        message: body.message.unwrap_or_default(),
        model: body.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        enabled_tools: body.enabled_tools,
        files,
    };

    // Run the turn on its own task: a client disconnect drops this handler
    // future, but the pipeline still finishes and persists consistently.
    let orchestrator = state.orchestrator.clone();
    let result = tokio::spawn(async move { orchestrator.run(turn).await }).await;

    match result {
        Ok(Ok(outcome)) => Json(serde_json::json!({
            "response": outcome.text,
            "chatId": outcome.chat_id,
            "model": outcome.model,
            "toolsUsed": outcome.tools_used,
        }))
        .into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => {
            error!("Chat turn task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Internal server error" })),
            )
                .into_response()
        }
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<(ChatBody, Vec<UploadedFile>), String> {
    let mut body = ChatBody::default();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Malformed multipart body: {e}"))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "message" => body.message = Some(read_text(field).await?),
            "chatId" => body.chat_id = Some(read_text(field).await?),
            "model" => body.model = Some(read_text(field).await?),
            "enabledTools" => {
                let raw = read_text(field).await?;
                body.enabled_tools = serde_json::from_str(&raw)
                    .map_err(|e| format!("enabledTools must be a JSON array: {e}"))?;
            }
            "attachments" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field.content_type().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| format!("Failed to read attachment {file_name}: {e}"))?
                    .to_vec();
                files.push(UploadedFile {
                    name: file_name,
                    mime_type,
                    data,
                });
            }
            _ => {}
        }
    }

    Ok((body, files))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, String> {
    field
        .text()
        .await
        .map_err(|e| format!("Malformed multipart field: {e}"))
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

pub(crate) fn error_response(err: ChatError) -> Response {
    let (status, message) = match &err {
        ChatError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
        ChatError::NotFound => (StatusCode::NOT_FOUND, "Chat not found".to_string()),
        ChatError::Forbidden => (StatusCode::FORBIDDEN, "Access denied".to_string()),
        ChatError::Completion(m) => {
            error!("Completion failure: {}", m);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process chat message".to_string(),
            )
        }
        ChatError::Internal(e) => {
            error!("Chat pipeline failure: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        }
    };
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
