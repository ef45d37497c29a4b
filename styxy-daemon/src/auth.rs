//! Bearer-token authentication.
//!
//! When `<config>/auth.token` exists, every endpoint except `/status` and
//! `/health` requires `Authorization: Bearer <token>`. Without the file,
//! the daemon is open on loopback.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::server::AppState;

/// Paths exempt from authentication.
const OPEN_PATHS: &[&str] = &["/status", "/health"];

/// Loads the bearer token from the config directory, if present.
pub fn load_token(paths: &styxy::ConfigPaths) -> Option<String> {
    let raw = std::fs::read_to_string(paths.auth_token_file()).ok()?;
    let token = raw.trim().to_string();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Middleware enforcing the bearer token.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ref token) = state.token else {
        return next.run(request).await;
    };
    if OPEN_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(presented) if presented == token => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "success": false,
                "error": "missing or invalid bearer token",
                "errorKind": "unauthorized",
            })),
        )
            .into_response(),
    }
}
