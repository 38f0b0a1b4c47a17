//! Route definitions and router construction.

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::bootstrap::{AxumContext, CorsConfig};
use crate::handlers;
use crate::state::AppState;

fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    match config {
        CorsConfig::AllowAll => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsConfig::AllowOrigins(origins) => {
            let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

/// API routes without the `/api` prefix, for nesting.
///
/// Axum 0.8 uses brace syntax for path parameters: `{name}`.
pub(crate) fn api_routes() -> Router<AppState> {
    Router::new()
        // Tool servers
        .route(
            "/servers",
            get(handlers::servers::list).post(handlers::servers::register),
        )
        .route("/servers/{name}", delete(handlers::servers::remove))
        .route("/servers/{name}/start", post(handlers::servers::start))
        .route("/servers/{name}/stop", post(handlers::servers::stop))
        .route("/servers/{name}/status", get(handlers::servers::status))
        .route(
            "/servers/{name}/refresh-capabilities",
            post(handlers::servers::refresh_capabilities),
        )
        .route(
            "/servers/{name}/tools/call",
            post(handlers::servers::call_tool),
        )
        // Sessions
        .route("/sessions", get(handlers::sessions::list))
        .route(
            "/sessions/{id}/cancel",
            post(handlers::sessions::cancel),
        )
        // Events (SSE)
        .route("/events", get(handlers::events::stream))
}

/// Create the main router: `/health`, `/api/*` and `/ws/chat`.
pub fn create_router(ctx: Arc<AxumContext>) -> Router {
    let cors = build_cors_layer(&ctx.cors);
    let state: AppState = ctx;

    Router::new()
        .route("/health", get(health_check))
        .route("/ws/chat", get(handlers::chat_ws::chat_ws))
        .nest("/api", api_routes().layer(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
pub(crate) async fn health_check() -> &'static str {
    "OK"
}
