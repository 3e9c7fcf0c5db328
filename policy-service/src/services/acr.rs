use std::cmp::Reverse;
use std::collections::BTreeSet;

use thiserror::Error;

use crate::models::AuthenticationPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcrError {
    #[error("No ACR mapping rule is satisfied by methods [{0}] and no default ACR is configured")]
    Unresolvable(String),
}

/// Maps satisfied authentication methods to an ACR value.
///
/// `ranking` lists ACR values strongest first. Values it does not mention
/// rank below every listed value, ordered by descending key.
#[derive(Debug, Clone, Default)]
pub struct AcrResolver {
    ranking: Vec<String>,
    default_acr: Option<String>,
}

impl AcrResolver {
    pub fn new(ranking: Vec<String>, default_acr: Option<String>) -> Self {
        Self {
            ranking,
            default_acr,
        }
    }

    /// `Ok(None)` when the policy defines no mapping rules at all.
    pub fn resolve(
        &self,
        policy: &AuthenticationPolicy,
        satisfied: &BTreeSet<String>,
    ) -> Result<Option<String>, AcrError> {
        if policy.acr_mapping_rules.is_empty() {
            return Ok(None);
        }

        let best = policy
            .acr_mapping_rules
            .iter()
            .filter(|(_, required)| is_satisfied(required, satisfied))
            .map(|(acr, _)| acr)
            .min_by_key(|acr| self.rank(acr.as_str()));

        match (best, &self.default_acr) {
            (Some(acr), _) => Ok(Some(acr.clone())),
            (None, Some(default)) => {
                tracing::debug!(default_acr = %default, "No ACR rule satisfied; using default");
                Ok(Some(default.clone()))
            }
            (None, None) => Err(AcrError::Unresolvable(
                satisfied.iter().cloned().collect::<Vec<_>>().join(", "),
            )),
        }
    }

    /// Scopes tied to a level of authentication that was not reached. A level
    /// label is reached when it names a satisfied ACR rule, or, without a
    /// rule, a satisfied method.
    pub fn denied_scopes(
        &self,
        policy: &AuthenticationPolicy,
        satisfied: &BTreeSet<String>,
    ) -> Vec<String> {
        let mut granted = BTreeSet::new();
        let mut denied = BTreeSet::new();

        for (level, scopes) in &policy.level_of_authentication_scopes {
            let reached = match policy.acr_mapping_rules.get(level) {
                Some(required) => is_satisfied(required, satisfied),
                None => satisfied.contains(level),
            };
            if reached {
                granted.extend(scopes.iter().cloned());
            } else {
                denied.extend(scopes.iter().cloned());
            }
        }

        denied.difference(&granted).cloned().collect()
    }

    fn rank(&self, acr: &str) -> (usize, Reverse<String>) {
        match self.ranking.iter().position(|r| r == acr) {
            Some(index) => (index, Reverse(String::new())),
            None => (self.ranking.len(), Reverse(acr.to_string())),
        }
    }
}

fn is_satisfied(required: &[String], satisfied: &BTreeSet<String>) -> bool {
    required.iter().all(|method| satisfied.contains(method))
}
