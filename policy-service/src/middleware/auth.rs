use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use super::scope_auth::{require_scope, MANAGEMENT_SCOPE};
use crate::services::OperatorClaims;
use crate::AppState;

/// Verifies the bearer token on management routes and requires the
/// management scope. Claims are left in request extensions.
pub async fn operator_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
        })?;

    let claims = state.verifier.verify(token).map_err(|e| {
        tracing::warn!(error = %e, "Rejected operator token");
        AppError::InvalidToken(e)
    })?;

    require_scope(&claims, MANAGEMENT_SCOPE)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Claims of the authenticated operator.
pub struct Operator(pub OperatorClaims);

#[async_trait]
impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OperatorClaims>()
            .cloned()
            .map(Operator)
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Operator claims missing from request"))
            })
    }
}
