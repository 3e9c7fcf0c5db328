pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

use std::sync::Arc;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{request_id_middleware, security_headers_middleware};
use service_core::utils::PaginationRules;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::middleware::{
    internal_api_key_middleware, metrics_middleware, operator_auth_middleware,
    INTERNAL_API_KEY_HEADER,
};
use crate::services::store::{OrganizationDirectory, PolicyConfigStore};
use crate::services::{PolicyConfigService, TokenVerifier, TransactionEngine};

const MANAGEMENT_PREFIX: &str =
    "/v1/management/organizations/:organization_id/tenants/:tenant_id";

#[derive(Clone)]
pub struct AppState {
    pub policies: PolicyConfigService,
    pub engine: Arc<TransactionEngine>,
    pub config_store: Arc<dyn PolicyConfigStore>,
    pub directory: Arc<dyn OrganizationDirectory>,
    pub verifier: TokenVerifier,
    pub internal_api_key: Arc<str>,
    pub pagination: PaginationRules,
    pub service_name: String,
    pub service_version: String,
    pub allowed_origins: Vec<String>,
}

pub fn build_router(state: AppState) -> Router {
    let management_routes = Router::new()
        .route(
            &format!("{}/authentication-policies", MANAGEMENT_PREFIX),
            get(handlers::policies::list_policy_configs)
                .post(handlers::policies::create_policy_config),
        )
        .route(
            &format!("{}/authentication-policies/:id", MANAGEMENT_PREFIX),
            get(handlers::policies::get_policy_config)
                .put(handlers::policies::update_policy_config)
                .delete(handlers::policies::delete_policy_config),
        )
        .route(
            &format!("{}/authentication-transactions", MANAGEMENT_PREFIX),
            get(handlers::transactions::list_transactions),
        )
        .route(
            &format!(
                "{}/authentication-transactions/:transaction_id",
                MANAGEMENT_PREFIX
            ),
            get(handlers::transactions::get_transaction),
        )
        .route(
            &format!("{}/authentication-interactions", MANAGEMENT_PREFIX),
            get(handlers::interactions::list_interactions),
        )
        .route(
            &format!(
                "{}/authentication-interactions/:transaction_id/types/:type",
                MANAGEMENT_PREFIX
            ),
            get(handlers::interactions::get_interaction),
        )
        .route_layer(from_fn_with_state(state.clone(), operator_auth_middleware));

    let internal_routes = Router::new()
        .route(
            "/v1/tenants/:tenant_id/authentication-transactions",
            post(handlers::internal::begin_transaction),
        )
        .route(
            "/v1/tenants/:tenant_id/authentication-transactions/:transaction_id",
            get(handlers::internal::get_transaction_snapshot),
        )
        .route(
            "/v1/tenants/:tenant_id/authentication-transactions/:transaction_id/interactions/:type",
            post(handlers::internal::record_interaction),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            internal_api_key_middleware,
        ));

    let cors = cors_layer(&state.allowed_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(management_routes)
        .merge(internal_routes)
        .route_layer(from_fn(metrics_middleware))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(parse_origins(allowed_origins))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(INTERNAL_API_KEY_HEADER),
            HeaderName::from_static("x-request-id"),
        ])
}

fn parse_origins(allowed_origins: &[String]) -> Vec<HeaderValue> {
    allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", origin, e);
                None
            }
        })
        .collect()
}
