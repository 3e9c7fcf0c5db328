use service_core::error::AppError;

use crate::services::OperatorClaims;

pub const MANAGEMENT_SCOPE: &str = "org-management";

pub fn require_scope(claims: &OperatorClaims, required: &str) -> Result<(), AppError> {
    let granted: Vec<&str> = claims.scopes().collect();
    if has_scope(&granted, required) {
        return Ok(());
    }

    tracing::warn!(
        sub = %claims.sub,
        required_scope = %required,
        granted_scopes = ?granted,
        "Insufficient scopes"
    );
    Err(AppError::InsufficientScope(anyhow::anyhow!(
        "Insufficient scopes. Required: {}",
        required
    )))
}

/// `*` grants everything; a trailing `*` grants by prefix.
pub fn has_scope(granted_scopes: &[&str], required: &str) -> bool {
    granted_scopes.iter().any(|granted| {
        *granted == "*"
            || *granted == required
            || granted
                .strip_suffix('*')
                .is_some_and(|prefix| required.starts_with(prefix))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(scope: &str) -> OperatorClaims {
        OperatorClaims {
            sub: "operator".to_string(),
            scope: scope.to_string(),
            org_id: None,
            exp: 0,
            iss: None,
            aud: None,
        }
    }

    #[test]
    fn test_has_scope_variants() {
        assert!(has_scope(&["org-management"], "org-management"));
        assert!(has_scope(&["*"], "org-management"));
        assert!(has_scope(&["org-*"], "org-management"));
        assert!(!has_scope(&["openid", "profile"], "org-management"));
        assert!(!has_scope(&[], "org-management"));
    }

    #[test]
    fn test_require_scope_is_insufficient_scope() {
        assert!(require_scope(&claims("openid org-management"), MANAGEMENT_SCOPE).is_ok());
        assert!(matches!(
            require_scope(&claims("openid"), MANAGEMENT_SCOPE),
            Err(AppError::InsufficientScope(_))
        ));
    }
}
