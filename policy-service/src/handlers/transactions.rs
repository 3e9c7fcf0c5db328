use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use service_core::utils::ListResponse;
use tracing::instrument;

use crate::dtos::{TransactionListQuery, TransactionView};
use crate::middleware::TenantScope;
use crate::utils::parse_id;
use crate::AppState;

#[instrument(skip(state, query), fields(tenant_id = %scope.tenant_id))]
pub async fn list_transactions(
    State(state): State<AppState>,
    scope: TenantScope,
    Query(query): Query<TransactionListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state
        .pagination
        .resolve(query.limit.as_deref(), query.offset.as_deref())?;
    let filter = query.filter()?;

    let (transactions, total) = state.engine.list(scope.tenant_id, &filter, page).await?;
    let views = transactions.iter().map(TransactionView::from).collect();
    Ok(Json(ListResponse::new(views, total, page)))
}

#[instrument(skip(state, path), fields(tenant_id = %scope.tenant_id))]
pub async fn get_transaction(
    State(state): State<AppState>,
    scope: TenantScope,
    path: Path<(String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let Path((_, _, raw_id)) = path;
    let transaction_id = parse_id("transaction_id", &raw_id)?;

    let tx = state.engine.get(scope.tenant_id, transaction_id).await?;
    Ok(Json(TransactionView::from(&tx)))
}
