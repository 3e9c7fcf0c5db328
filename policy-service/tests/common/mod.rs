//! Shared setup for policy-service integration tests: in-memory stores,
//! HS256 operator tokens and request helpers.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body, Bytes},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use policy_service::services::metrics::init_metrics;
use policy_service::services::store::{
    InMemoryOrganizationDirectory, InMemoryPolicyConfigStore, InMemoryTransactionStore,
    PolicyConfigStore,
};
use policy_service::services::{
    AcrResolver, OperatorClaims, PolicyConfigService, TokenVerifier, TransactionEngine,
};
use policy_service::{build_router, AppState};
use serde_json::{json, Value};
use service_core::utils::PaginationRules;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &[u8] = b"policy-service-test-secret";
pub const TEST_ISSUER: &str = "https://idp.test";
pub const INTERNAL_KEY: &str = "internal-test-key";

pub const GOLD: &str = "urn:mace:incommon:iap:gold";
pub const SILVER: &str = "urn:mace:incommon:iap:silver";

pub struct TestApp {
    pub router: Router,
    pub organization_id: Uuid,
    pub tenant_id: Uuid,
    pub directory: Arc<InMemoryOrganizationDirectory>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_ttl(Duration::seconds(600))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        init_metrics().unwrap();

        let organization_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let directory = Arc::new(InMemoryOrganizationDirectory::new());
        directory.assign(organization_id, tenant_id);

        let config_store: Arc<dyn PolicyConfigStore> = Arc::new(InMemoryPolicyConfigStore::new());
        let engine = TransactionEngine::new(
            config_store.clone(),
            Arc::new(InMemoryTransactionStore::new()),
            AcrResolver::new(vec![GOLD.to_string(), SILVER.to_string()], None),
            ttl,
        );

        let state = AppState {
            policies: PolicyConfigService::new(config_store.clone()),
            engine: Arc::new(engine),
            config_store,
            directory: directory.clone(),
            verifier: TokenVerifier::from_secret(TEST_SECRET, Some(TEST_ISSUER), None),
            internal_api_key: Arc::from(INTERNAL_KEY),
            pagination: PaginationRules::default(),
            service_name: "policy-service".to_string(),
            service_version: "0.1.0".to_string(),
            allowed_origins: vec!["http://localhost:3000".to_string()],
        };

        Self {
            router: build_router(state),
            organization_id,
            tenant_id,
            directory,
        }
    }

    /// Operator token with the management scope for this app's organization.
    pub fn token(&self) -> String {
        token_with("openid org-management", Some(self.organization_id.to_string()))
    }

    pub fn management(&self, suffix: &str) -> String {
        format!(
            "/v1/management/organizations/{}/tenants/{}/{}",
            self.organization_id, self.tenant_id, suffix
        )
    }

    pub fn internal_path(&self, suffix: &str) -> String {
        format!("/v1/tenants/{}/{}", self.tenant_id, suffix)
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<String>,
    ) -> (StatusCode, Bytes) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes)
    }

    /// Management call authenticated with `token()`.
    pub async fn manage(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let token = self.token();
        self.manage_as(&token, method, uri, body).await
    }

    pub async fn manage_as(
        &self,
        token: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let bearer = format!("Bearer {}", token);
        let (status, bytes) = self
            .send(
                method,
                uri,
                &[("authorization", bearer.as_str())],
                body.map(|b| b.to_string()),
            )
            .await;
        (status, to_json(&bytes))
    }

    /// Call on the interaction surface with the internal API key.
    pub async fn internal(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self
            .send(
                method,
                uri,
                &[("x-internal-api-key", INTERNAL_KEY)],
                body.map(|b| b.to_string()),
            )
            .await;
        (status, to_json(&bytes))
    }

    pub async fn create_config(&self, body: Value) -> Value {
        let (status, json) = self
            .manage(Method::POST, &self.management("authentication-policies"), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {}", json);
        json["result"].clone()
    }

    pub async fn begin(&self, flow: &str, client_id: &str, scopes: &[&str]) -> (StatusCode, Value) {
        self.internal(
            Method::POST,
            &self.internal_path("authentication-transactions"),
            Some(json!({
                "flow": flow,
                "client_id": client_id,
                "scopes": scopes,
            })),
        )
        .await
    }

    pub async fn attempt(
        &self,
        transaction_id: &str,
        interaction_type: &str,
        outcome: &str,
    ) -> (StatusCode, Value) {
        self.internal(
            Method::POST,
            &self.internal_path(&format!(
                "authentication-transactions/{}/interactions/{}",
                transaction_id, interaction_type
            )),
            Some(json!({
                "outcome": outcome,
                "user_id": "user-1",
                "payload": { "username": "alice" }
            })),
        )
        .await
    }
}

pub fn token_with(scope: &str, org_id: Option<String>) -> String {
    let claims = OperatorClaims {
        sub: "operator-1".to_string(),
        scope: scope.to_string(),
        org_id,
        exp: (Utc::now() + Duration::minutes(5)).timestamp(),
        iss: Some(TEST_ISSUER.to_string()),
        aud: None,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET),
    )
    .unwrap()
}

pub fn to_json(bytes: &Bytes) -> Value {
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(bytes).unwrap_or(Value::Null)
    }
}

/// Password-first policy: one password success is SILVER, password plus
/// fido2 is GOLD, two password failures lock the transaction.
pub fn password_policy(flow: &str) -> Value {
    json!({
        "flow": flow,
        "policies": [{
            "description": "Password login for the web app",
            "priority": 1,
            "conditions": {
                "client_ids": ["web-app"]
            },
            "available_methods": ["password", "fido2"],
            "success_conditions": {
                "any_of": [[{
                    "path": "$.password-authentication.success_count",
                    "type": "integer",
                    "operation": "gte",
                    "value": 1
                }]]
            },
            "lock_conditions": {
                "any_of": [[{
                    "path": "password-authentication.failure_count",
                    "type": "integer",
                    "operation": "gte",
                    "value": 2
                }]]
            },
            "acr_mapping_rules": {
                GOLD: ["password", "fido2"],
                SILVER: ["password"]
            },
            "level_of_authentication_scopes": {
                GOLD: ["transfers"]
            }
        }]
    })
}
