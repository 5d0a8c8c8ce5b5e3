//! HTTP surface of the relying party

pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Login is started from browser frontends on other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route(
            "/.well-known/openid-federation",
            get(handlers::entity_configuration),
        )
        .route("/auth/login", post(handlers::start_login))
        .route("/auth/callback", get(handlers::callback))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
