//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`, except `/health`.
//! Middleware: CORS, tracing.

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Message intake
        .route("/messages", post(handlers::message::process_message))
        // Conversation management
        .route(
            "/conversations/{key}/clear",
            post(handlers::conversation::clear_conversation),
        )
        .route(
            "/conversations/{key}/provider",
            put(handlers::conversation::set_provider),
        )
        .route(
            "/conversations/{key}/prompt",
            put(handlers::conversation::set_prompt),
        )
        .route(
            "/conversations/{key}/temperature",
            put(handlers::conversation::set_temperature),
        )
        .route(
            "/conversations/{key}/settings",
            get(handlers::conversation::get_settings),
        )
        // Operational
        .route("/quota/{user}", get(handlers::admin::get_quota))
        .route("/providers", get(handlers::admin::list_providers))
        .route("/events", get(handlers::admin::list_events));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness check; no envelope, no auth.
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
