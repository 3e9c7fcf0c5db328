//! Interaction surface used by the authorization server while it walks a
//! user through authentication.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use tracing::instrument;

use crate::dtos::{BeginTransactionRequest, InteractionRequest, TransactionView};
use crate::services::Attempt;
use crate::utils::{parse_id, ValidatedJson};
use crate::AppState;

#[instrument(skip(state, body), fields(flow = %body.flow, client_id = %body.client_id))]
pub async fn begin_transaction(
    State(state): State<AppState>,
    Path(raw_tenant): Path<String>,
    ValidatedJson(body): ValidatedJson<BeginTransactionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = parse_id("tenant_id", &raw_tenant)?;

    let started = state
        .engine
        .begin(tenant_id, &body.flow, body.request_context())
        .await?;

    let mut view = TransactionView::from(&started.transaction);
    view.available_methods = Some(started.available_methods);
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip(state, body), fields(outcome = ?body.outcome))]
pub async fn record_interaction(
    State(state): State<AppState>,
    Path((raw_tenant, raw_tx, interaction_type)): Path<(String, String, String)>,
    ValidatedJson(body): ValidatedJson<InteractionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = parse_id("tenant_id", &raw_tenant)?;
    let transaction_id = parse_id("transaction_id", &raw_tx)?;

    let tx = state
        .engine
        .record_attempt(
            tenant_id,
            transaction_id,
            &interaction_type,
            Attempt {
                outcome: body.outcome,
                user_id: body.user_id,
                payload: body.payload,
            },
        )
        .await?;
    Ok(Json(TransactionView::from(&tx)))
}

#[instrument(skip(state))]
pub async fn get_transaction_snapshot(
    State(state): State<AppState>,
    Path((raw_tenant, raw_tx)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = parse_id("tenant_id", &raw_tenant)?;
    let transaction_id = parse_id("transaction_id", &raw_tx)?;

    let tx = state.engine.get(tenant_id, transaction_id).await?;
    Ok(Json(TransactionView::from(&tx)))
}
