//! Router assembly.

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use styxy::Daemon;

use crate::{auth, handlers};

/// Shared state behind every handler.
pub struct AppState {
    /// The port coordination core.
    pub daemon: Arc<Daemon>,
    /// Bearer token; auth is enforced when present.
    pub token: Option<String>,
}

/// Builds the daemon's router with auth middleware applied.
pub fn build_router(state: AppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .route("/allocate", post(handlers::allocate))
        .route("/allocate/{lock_id}", delete(handlers::release))
        .route("/check/{port}", get(handlers::check))
        .route("/scan", get(handlers::scan))
        .route("/allocations", get(handlers::list_allocations))
        .route("/instance/list", get(handlers::list_instances))
        .route("/instance/register", post(handlers::register_instance))
        .route("/instance/{id}/heartbeat", put(handlers::heartbeat))
        .route("/observe/all", get(handlers::observe_all))
        .route("/observe/{port}", get(handlers::observe))
        .route("/suggest/{service_type}", get(handlers::suggest))
        .route("/observation-stats", get(handlers::observation_stats))
        .route("/cleanup", post(handlers::cleanup))
        .route("/status", get(handlers::status))
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::config))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_bearer,
        ))
        .with_state(state)
}
