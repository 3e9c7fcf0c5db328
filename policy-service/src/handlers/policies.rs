use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use service_core::utils::{parse_flag, EnabledFilter, ListResponse};
use tracing::instrument;

use crate::dtos::{DryRunQuery, PolicyConfigRequest, PolicyListQuery};
use crate::middleware::{Operator, TenantScope};
use crate::services::{DeletionPreview, ExecutionMode, MutationPreview};
use crate::utils::{parse_id, ValidatedJson};
use crate::AppState;

type ConfigPath = Path<(String, String, String)>;

fn execution_mode(query: &DryRunQuery) -> Result<ExecutionMode, AppError> {
    Ok(ExecutionMode::from_flag(parse_flag(
        "dry_run",
        query.dry_run.as_deref(),
    )?))
}

#[instrument(
    skip(state, operator, query, body),
    fields(tenant_id = %scope.tenant_id, operator = %operator.sub)
)]
pub async fn create_policy_config(
    State(state): State<AppState>,
    scope: TenantScope,
    Operator(operator): Operator,
    Query(query): Query<DryRunQuery>,
    ValidatedJson(body): ValidatedJson<PolicyConfigRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mode = execution_mode(&query)?;
    let config = state.policies.create(scope.tenant_id, body, mode).await?;
    Ok((StatusCode::CREATED, Json(MutationPreview::new(mode, config))))
}

#[instrument(skip(state, query), fields(tenant_id = %scope.tenant_id))]
pub async fn list_policy_configs(
    State(state): State<AppState>,
    scope: TenantScope,
    Query(query): Query<PolicyListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state
        .pagination
        .resolve(query.limit.as_deref(), query.offset.as_deref())?;
    let filter = EnabledFilter::from_include_disabled(parse_flag(
        "include_disabled",
        query.include_disabled.as_deref(),
    )?);

    let (configs, total) = state.policies.list(scope.tenant_id, filter, page).await?;
    Ok(Json(ListResponse::new(configs, total, page)))
}

#[instrument(skip(state, path), fields(tenant_id = %scope.tenant_id))]
pub async fn get_policy_config(
    State(state): State<AppState>,
    scope: TenantScope,
    path: ConfigPath,
) -> Result<impl IntoResponse, AppError> {
    let Path((_, _, raw_id)) = path;
    let config_id = parse_id("id", &raw_id)?;

    let config = state.policies.get(scope.tenant_id, config_id).await?;
    Ok(Json(config.as_ref().clone()))
}

#[instrument(
    skip(state, operator, path, query, body),
    fields(tenant_id = %scope.tenant_id, operator = %operator.sub)
)]
pub async fn update_policy_config(
    State(state): State<AppState>,
    scope: TenantScope,
    Operator(operator): Operator,
    path: ConfigPath,
    Query(query): Query<DryRunQuery>,
    ValidatedJson(body): ValidatedJson<PolicyConfigRequest>,
) -> Result<impl IntoResponse, AppError> {
    let Path((_, _, raw_id)) = path;
    let config_id = parse_id("id", &raw_id)?;
    let mode = execution_mode(&query)?;

    let config = state
        .policies
        .update(scope.tenant_id, config_id, body, mode)
        .await?;
    Ok(Json(MutationPreview::new(mode, config)))
}

#[instrument(
    skip(state, operator, path, query),
    fields(tenant_id = %scope.tenant_id, operator = %operator.sub)
)]
pub async fn delete_policy_config(
    State(state): State<AppState>,
    scope: TenantScope,
    Operator(operator): Operator,
    path: ConfigPath,
    Query(query): Query<DryRunQuery>,
) -> Result<Response, AppError> {
    let Path((_, _, raw_id)) = path;
    let config_id = parse_id("id", &raw_id)?;
    let mode = execution_mode(&query)?;

    state.policies.delete(scope.tenant_id, config_id, mode).await?;

    Ok(match mode {
        ExecutionMode::DryRun => Json(DeletionPreview::simulated(config_id)).into_response(),
        ExecutionMode::Commit => StatusCode::NO_CONTENT.into_response(),
    })
}
