//! API routes

pub mod billing;
pub mod entitlements;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Provider webhook bodies are small; anything larger is not a real event
const WEBHOOK_BODY_LIMIT: usize = 256 * 1024;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness));

    let billing_routes = Router::new()
        .route(
            "/webhook",
            post(billing::webhook).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        )
        .route("/checkout", post(billing::create_checkout))
        .route("/portal", post(billing::create_portal_session));

    let entitlement_routes = Router::new()
        .route("/:user_id", get(entitlements::summary))
        .route("/:user_id/check", get(entitlements::check));

    let api_v1_routes = Router::new()
        .nest("/billing", billing_routes)
        .nest("/entitlements", entitlement_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
