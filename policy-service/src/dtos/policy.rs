use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::models::{AuthenticationPolicy, AuthenticationPolicyConfig};

/// Body of POST and PUT on `authentication-policies`. `id` is optional on
/// create and, when present on update, must match the path.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfigRequest {
    #[serde(default)]
    pub id: Option<Uuid>,

    #[validate(length(min = 1, message = "flow is required"))]
    pub flow: String,

    #[serde(default)]
    pub enabled: Option<bool>,

    #[validate(length(min = 1, message = "At least one policy is required"))]
    pub policies: Vec<AuthenticationPolicy>,
}

impl PolicyConfigRequest {
    pub fn into_config(self, id: Uuid) -> AuthenticationPolicyConfig {
        AuthenticationPolicyConfig {
            id,
            flow: self.flow,
            enabled: self.enabled.unwrap_or(true),
            policies: self.policies,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PolicyListQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub include_disabled: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DryRunQuery {
    pub dry_run: Option<String>,
}
