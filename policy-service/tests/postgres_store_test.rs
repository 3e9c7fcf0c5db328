//! Store tests against a live PostgreSQL. Run with
//! `DATABASE_URL=postgres://... cargo test -- --ignored`.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use policy_service::models::{
    AuthenticationPolicy, AuthenticationPolicyConfig, AuthenticationTransaction,
    InteractionOutcome, PolicyConditions, RequestContext, TransactionFilter,
};
use policy_service::services::store::{
    OrganizationDirectory, PgOrganizationDirectory, PgPolicyConfigStore, PgTransactionStore,
    PolicyConfigStore, StoreError, TransactionStore,
};
use policy_service::services::Database;
use service_core::utils::{EnabledFilter, Page};
use uuid::Uuid;

async fn database() -> Database {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let db = Database::connect(&url, 2).await.unwrap();
    db.migrate().await.unwrap();
    db
}

fn config(flow: &str) -> AuthenticationPolicyConfig {
    AuthenticationPolicyConfig {
        id: Uuid::new_v4(),
        flow: flow.to_string(),
        enabled: true,
        policies: vec![AuthenticationPolicy {
            description: None,
            priority: 1,
            conditions: PolicyConditions::default(),
            available_methods: vec!["password".to_string()],
            success_conditions: None,
            failure_conditions: None,
            lock_conditions: None,
            acr_mapping_rules: BTreeMap::new(),
            level_of_authentication_scopes: BTreeMap::new(),
        }],
    }
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_config_round_trip_and_flow_uniqueness() {
    let db = database().await;
    let store = PgPolicyConfigStore::new(db.pool().clone());
    let tenant = Uuid::new_v4();

    let original = config("oauth");
    store.insert(tenant, &original).await.unwrap();

    let found = store.find_by_flow(tenant, "oauth").await.unwrap().unwrap();
    assert_eq!(*found, original);

    let duplicate = store.insert(tenant, &config("oauth")).await;
    assert!(matches!(duplicate, Err(StoreError::Duplicate(_))));

    let (list, total) = store
        .list(tenant, EnabledFilter::EnabledOnly, Page::new(10, 0))
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(list.len(), 1);

    assert!(store.delete(tenant, original.id).await.unwrap());
    assert!(store.find(tenant, original.id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_transaction_save_is_compare_and_swap() {
    let db = database().await;
    let store = PgTransactionStore::new(db.pool().clone());
    let now = Utc::now();

    let mut tx = AuthenticationTransaction::new(
        Uuid::new_v4(),
        "oauth",
        RequestContext {
            client_id: "web-app".to_string(),
            ..Default::default()
        },
        Duration::minutes(10),
        now,
    );
    store.insert(&tx).await.unwrap();

    tx.record(
        "password-authentication",
        InteractionOutcome::Success,
        Some("user-1".to_string()),
        None,
        now,
    );
    tx.version = 1;
    store.save(&tx, 0).await.unwrap();

    let stale = store.save(&tx, 0).await;
    assert!(matches!(stale, Err(StoreError::VersionConflict(_))));

    let found = store
        .find(tx.tenant_id, tx.transaction_id, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.version, 1);
    assert_eq!(found.interactions["password-authentication"].success_count, 1);

    let (list, total) = store
        .list(
            tx.tenant_id,
            &TransactionFilter::default(),
            Page::new(10, 0),
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(list[0].transaction_id, tx.transaction_id);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_expired_transactions_are_hidden_and_purged() {
    let db = database().await;
    let store = PgTransactionStore::new(db.pool().clone());
    let now = Utc::now();

    let tx = AuthenticationTransaction::new(
        Uuid::new_v4(),
        "oauth",
        RequestContext::default(),
        Duration::seconds(1),
        now,
    );
    store.insert(&tx).await.unwrap();

    let later = now + Duration::seconds(5);
    assert!(store
        .find(tx.tenant_id, tx.transaction_id, later)
        .await
        .unwrap()
        .is_none());
    assert!(store.purge_expired(later).await.unwrap() >= 1);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_organization_directory() {
    let db = database().await;
    let directory = PgOrganizationDirectory::new(db.pool().clone());
    let org = Uuid::new_v4();
    let tenant = Uuid::new_v4();

    sqlx::query("INSERT INTO organizations (organization_id, name) VALUES ($1, $2)")
        .bind(org)
        .bind("Acme")
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO organization_tenants (organization_id, tenant_id) VALUES ($1, $2)")
        .bind(org)
        .bind(tenant)
        .execute(db.pool())
        .await
        .unwrap();

    assert!(directory.organization_exists(org).await.unwrap());
    assert!(directory.tenant_in_organization(org, tenant).await.unwrap());
    assert!(!directory
        .tenant_in_organization(org, Uuid::new_v4())
        .await
        .unwrap());
    assert!(!directory.organization_exists(Uuid::new_v4()).await.unwrap());
}
