use thiserror::Error;

use crate::models::{AuthenticationPolicy, AuthenticationPolicyConfig, RequestContext};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Authentication policy config '{0}' is disabled")]
    ConfigDisabled(String),

    #[error("No authentication policy matches client '{client_id}' in flow '{flow}'")]
    NoMatchingPolicy { flow: String, client_id: String },
}

/// Picks the first policy, in ascending priority, whose conditions admit the
/// request. Equal priorities keep list order.
pub fn select<'a>(
    config: &'a AuthenticationPolicyConfig,
    request: &RequestContext,
) -> Result<&'a AuthenticationPolicy, SelectionError> {
    if !config.enabled {
        return Err(SelectionError::ConfigDisabled(config.flow.clone()));
    }

    let mut ordered: Vec<&AuthenticationPolicy> = config.policies.iter().collect();
    ordered.sort_by_key(|p| p.priority);

    ordered
        .into_iter()
        .find(|policy| matches(policy, request))
        .ok_or_else(|| SelectionError::NoMatchingPolicy {
            flow: config.flow.clone(),
            client_id: request.client_id.clone(),
        })
}

pub fn matches(policy: &AuthenticationPolicy, request: &RequestContext) -> bool {
    let conditions = &policy.conditions;

    let client_ok = constraint(&conditions.client_ids)
        .map_or(true, |ids| ids.iter().any(|id| *id == request.client_id));
    let scopes_ok = constraint(&conditions.scopes).map_or(true, |scopes| intersects(scopes, &request.scopes));
    let acr_ok = constraint(&conditions.acr_values)
        .map_or(true, |values| intersects(values, &request.acr_values));

    client_ok && scopes_ok && acr_ok
}

fn constraint(values: &Option<Vec<String>>) -> Option<&[String]> {
    values.as_deref().filter(|v| !v.is_empty())
}

fn intersects(allowed: &[String], requested: &[String]) -> bool {
    requested.iter().any(|r| allowed.contains(r))
}
