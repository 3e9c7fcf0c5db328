use axum::{extract::State, Json};
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": state.service_name,
        "version": state.service_version,
    }))
}

/// 503 while storage is unreachable.
pub async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.config_store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Storage readiness check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(json!({
        "status": "ready",
        "service": state.service_name,
    })))
}
