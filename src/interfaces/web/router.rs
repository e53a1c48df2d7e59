use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{chat, chats, feedback, health, mcp, tools};

fn build_cors(frontend_url: Option<&str>) -> CorsLayer {
    let mut origins: Vec<String> = vec![
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ];
    if let Some(url) = frontend_url {
        origins.push(url.to_string());
    }
    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    let cors = build_cors(state.frontend_url.as_deref());

    // Health, worker status and the public feedback wall bypass auth.
    let public_routes = Router::new()
        .route("/api/health", get(health::health_endpoint))
        .route("/api/mcp/status", get(mcp::mcp_status_endpoint))
        .route("/api/feedback", get(feedback::list_feedback_endpoint))
        .with_state(state.clone());

    let authed_routes = Router::new()
        .route("/api/chat", post(chat::chat_endpoint))
        .route(
            "/api/chat/{chat_id}",
            get(chats::get_chat_endpoint).delete(chats::delete_chat_endpoint),
        )
        .route("/api/chats", get(chats::list_chats_endpoint))
        .route("/api/tools", get(tools::get_tools_endpoint))
        .route("/api/mcp/restart", post(mcp::mcp_restart_endpoint))
        .route("/api/feedback", post(feedback::submit_feedback_endpoint))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .with_state(state.clone());

    public_routes
        .merge(authed_routes)
        .layer(middleware::from_fn(security_headers))
        .layer(cors)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'",
        ),
    );
    response
}
