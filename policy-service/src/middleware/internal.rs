use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use subtle::ConstantTimeEq;

use crate::AppState;

pub const INTERNAL_API_KEY_HEADER: &str = "x-internal-api-key";

/// Guards the interaction surface called by the authorization server.
pub async fn internal_api_key_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(INTERNAL_API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let expected = state.internal_api_key.as_bytes();
    let valid = !expected.is_empty() && bool::from(provided.as_bytes().ct_eq(expected));
    if !valid {
        tracing::warn!("Failed internal API key authentication attempt");
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid or missing internal API key"
        )));
    }

    Ok(next.run(req).await)
}
