//! API request handlers

use super::models::{
    DownloadedModelInfo, DownloadedModelsResponse, HealthResponse, LoadResponse,
    ModelListResponse, ModelRequest, PullResponse, UnloadResponse,
};
use super::routes::AppState;
use crate::error::ApiError;
use crate::models::storage;
use axum::{Json, extract::State, http::StatusCode};

/// GET /health - Host health check
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// GET /v1/models - Models declared in the manifest
pub async fn list_models(State(state): State<AppState>) -> Json<ModelListResponse> {
    Json(ModelListResponse {
        models: state.manager.list_declared(),
    })
}

/// GET /v1/ps - Currently loaded models
pub async fn list_loaded(State(state): State<AppState>) -> Json<ModelListResponse> {
    Json(ModelListResponse {
        models: state.manager.list_loaded(),
    })
}

/// GET /v1/downloaded - Models present on local storage
pub async fn list_downloaded(
    State(state): State<AppState>,
) -> Result<Json<DownloadedModelsResponse>, ApiError> {
    let downloaded: Vec<_> = state
        .manager
        .list_downloaded()
        .into_iter()
        .map(|m| {
            let loaded_at = state.manager.get_runner(&m.model_id).map(|r| r.loaded_at());
            (m, loaded_at)
        })
        .collect();

    // Directory sizes walk the filesystem
    let models = tokio::task::spawn_blocking(move || {
        downloaded
            .into_iter()
            .map(|(m, loaded_at)| DownloadedModelInfo {
                size_bytes: storage::dir_size(&m.local_path),
                loaded: loaded_at.is_some(),
                loaded_at,
                model_id: m.model_id,
                local_path: m.local_path,
            })
            .collect()
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?;

    Ok(Json(DownloadedModelsResponse { models }))
}

/// POST /v1/pull - Download a declared model
pub async fn pull_model(
    State(state): State<AppState>,
    Json(req): Json<ModelRequest>,
) -> Result<Json<PullResponse>, ApiError> {
    tracing::info!(model_id = %req.model, "Pull requested");
    let status = state.manager.download(&req.model).await?;

    Ok(Json(PullResponse {
        model: req.model,
        status,
    }))
}

/// POST /v1/load - Construct the engine for a downloaded model
pub async fn load_model(
    State(state): State<AppState>,
    Json(req): Json<ModelRequest>,
) -> Result<Json<LoadResponse>, ApiError> {
    tracing::info!(model_id = %req.model, "Load requested");
    let status = state.manager.load(&req.model).await?;

    Ok(Json(LoadResponse {
        model: req.model,
        status,
    }))
}

/// POST /v1/unload - Release a loaded model
pub async fn unload_model(
    State(state): State<AppState>,
    Json(req): Json<ModelRequest>,
) -> Result<Json<UnloadResponse>, ApiError> {
    state.manager.unload(&req.model)?;

    Ok(Json(UnloadResponse {
        model: req.model,
        status: "unloaded".to_string(),
    }))
}
