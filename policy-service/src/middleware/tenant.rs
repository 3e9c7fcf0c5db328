use std::collections::HashMap;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::services::OperatorClaims;
use crate::utils::parse_id;
use crate::AppState;

/// Organization and tenant named by a management path, checked against the
/// operator token and the organization directory.
#[derive(Debug, Clone, Copy)]
pub struct TenantScope {
    pub organization_id: Uuid,
    pub tenant_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for TenantScope {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e.body_text())))?;

        let organization_id = parse_id(
            "organization_id",
            params.get("organization_id").map(String::as_str).unwrap_or_default(),
        )?;
        let tenant_id = parse_id(
            "tenant_id",
            params.get("tenant_id").map(String::as_str).unwrap_or_default(),
        )?;

        let claims = parts.extensions.get::<OperatorClaims>().ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Operator claims missing from request"))
        })?;

        let token_org = claims
            .org_id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw).ok());
        if token_org != Some(organization_id) {
            tracing::warn!(
                sub = %claims.sub,
                organization_id = %organization_id,
                "Token organization does not match path"
            );
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Token is not valid for organization {}",
                organization_id
            )));
        }

        let directory = &state.directory;
        let known = directory
            .organization_exists(organization_id)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        if !known {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Organization {} not found",
                organization_id
            )));
        }

        let assigned = directory
            .tenant_in_organization(organization_id, tenant_id)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        if !assigned {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Tenant {} not found in organization {}",
                tenant_id,
                organization_id
            )));
        }

        Ok(Self {
            organization_id,
            tenant_id,
        })
    }
}
