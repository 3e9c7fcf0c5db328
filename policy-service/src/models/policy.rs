use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use service_core::utils::Toggleable;
use uuid::Uuid;

use super::condition::ConditionNode;

/// A tenant's policy set for one authorization flow.
///
/// Timestamps live beside the config in storage, never in the body, so a
/// config read back and written unchanged serializes byte-for-byte the same.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationPolicyConfig {
    pub id: Uuid,
    pub flow: String,
    pub enabled: bool,
    pub policies: Vec<AuthenticationPolicy>,
}

impl Toggleable for AuthenticationPolicyConfig {
    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: i32,
    #[serde(default)]
    pub conditions: PolicyConditions,
    #[serde(default)]
    pub available_methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_conditions: Option<ConditionNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_conditions: Option<ConditionNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_conditions: Option<ConditionNode>,
    /// ACR value -> methods that must all have succeeded.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub acr_mapping_rules: BTreeMap<String, Vec<String>>,
    /// Level label -> scopes that require that level.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub level_of_authentication_scopes: BTreeMap<String, Vec<String>>,
}

impl AuthenticationPolicy {
    pub fn permits_method(&self, method: &str) -> bool {
        self.available_methods.is_empty() || self.available_methods.iter().any(|m| m == method)
    }
}

/// Request predicate. Unset or empty lists match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr_values: Option<Vec<String>>,
}
