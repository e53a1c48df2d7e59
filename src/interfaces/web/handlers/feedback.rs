use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{error, info};

use super::super::AppState;
use super::super::auth::AuthedUser;

#[derive(Deserialize)]
pub struct FeedbackRequest {
    message: String,
    rating: i64,
}

pub async fn submit_feedback_endpoint(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Json(payload): Json<FeedbackRequest>,
) -> Response {
    let message = payload.message.trim();
    if message.is_empty() {
        return bad_request("Message and rating are required");
    }
    if !(1..=5).contains(&payload.rating) {
        return bad_request("Rating must be between 1 and 5");
    }

    let user_name = match state.store.get_user(&user.0).await {
        Ok(Some(u)) => u.name,
        Ok(None) => "Anonymous".to_string(),
        Err(e) => return internal(e),
    };

    match state
        .store
        .create_feedback(&user.0, &user_name, message, payload.rating)
        .await
    {
        Ok(feedback) => {
            info!("Feedback submitted by {}: rating {}", user.0, feedback.rating);
            Json(serde_json::json!({
                "message": "Feedback submitted successfully",
                "feedback": {
                    "id": feedback.id,
                    "message": feedback.message,
                    "rating": feedback.rating,
                    "created_at": feedback.created_at,
                }
            }))
            .into_response()
        }
        Err(e) => internal(e),
    }
}

/// `GET /api/feedback` — latest public feedback, unauthenticated.
pub async fn list_feedback_endpoint(State(state): State<AppState>) -> Response {
    match state.store.list_feedback(10).await {
        Ok(feedback) => Json(serde_json::json!({ "feedback": feedback })).into_response(),
        Err(e) => internal(e),
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn internal(e: anyhow::Error) -> Response {
    error!("Feedback store failure: {:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Internal server error" })),
    )
        .into_response()
}
