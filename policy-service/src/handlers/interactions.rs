use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use service_core::utils::ListResponse;
use tracing::instrument;

use crate::dtos::{InteractionListQuery, InteractionResult};
use crate::middleware::TenantScope;
use crate::utils::parse_id;
use crate::AppState;

#[instrument(skip(state, query), fields(tenant_id = %scope.tenant_id))]
pub async fn list_interactions(
    State(state): State<AppState>,
    scope: TenantScope,
    Query(query): Query<InteractionListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state
        .pagination
        .resolve(query.limit.as_deref(), query.offset.as_deref())?;
    let filter = query.filter()?;

    let (records, total) = state
        .engine
        .list_interactions(scope.tenant_id, &filter, page)
        .await?;
    Ok(Json(ListResponse::new(records, total, page)))
}

#[instrument(skip(state, path), fields(tenant_id = %scope.tenant_id))]
pub async fn get_interaction(
    State(state): State<AppState>,
    scope: TenantScope,
    path: Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let Path((_, _, raw_id, interaction_type)) = path;
    let transaction_id = parse_id("transaction_id", &raw_id)?;

    let record = state
        .engine
        .get_interaction(scope.tenant_id, transaction_id, &interaction_type)
        .await?;
    Ok(Json(InteractionResult { result: record }))
}
