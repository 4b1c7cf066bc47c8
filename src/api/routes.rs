//! API route definitions

use crate::models::ModelManager;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{chat, handlers};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ModelManager>,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // Model inventory
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/ps", get(handlers::list_loaded))
        .route("/v1/downloaded", get(handlers::list_downloaded))
        // Model lifecycle
        .route("/v1/pull", post(handlers::pull_model))
        .route("/v1/load", post(handlers::load_model))
        .route("/v1/unload", post(handlers::unload_model))
        // Inference
        .route("/v1/chat/completions", post(chat::chat_completions))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
