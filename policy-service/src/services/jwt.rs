use std::fs;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by operator tokens on the management surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorClaims {
    pub sub: String,
    /// Space-separated scopes.
    #[serde(default)]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl OperatorClaims {
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }
}

/// Verifies bearer tokens. RS256 in deployments; HS256 is accepted only when
/// a shared secret is configured (development and tests).
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn from_rsa_pem_file(
        path: &str,
        issuer: Option<&str>,
        audience: Option<&str>,
    ) -> Result<Self, anyhow::Error> {
        let pem = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read public key from {}: {}", path, e))?;
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;
        Ok(Self::with_key(key, Algorithm::RS256, issuer, audience))
    }

    pub fn from_secret(secret: &[u8], issuer: Option<&str>, audience: Option<&str>) -> Self {
        Self::with_key(
            DecodingKey::from_secret(secret),
            Algorithm::HS256,
            issuer,
            audience,
        )
    }

    fn with_key(
        key: DecodingKey,
        algorithm: Algorithm,
        issuer: Option<&str>,
        audience: Option<&str>,
    ) -> Self {
        let mut validation = Validation::new(algorithm);
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        Self { key, validation }
    }

    pub fn verify(&self, token: &str) -> Result<OperatorClaims, jsonwebtoken::errors::Error> {
        decode::<OperatorClaims>(token, &self.key, &self.validation).map(|data| data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret";

    fn claims(exp_offset: Duration) -> OperatorClaims {
        OperatorClaims {
            sub: "operator-1".to_string(),
            scope: "openid org-management".to_string(),
            org_id: Some("org".to_string()),
            exp: (Utc::now() + exp_offset).timestamp(),
            iss: Some("https://idp.example.com".to_string()),
            aud: None,
        }
    }

    fn sign(claims: &OperatorClaims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_round_trips_claims() {
        let verifier = TokenVerifier::from_secret(SECRET, Some("https://idp.example.com"), None);
        let verified = verifier.verify(&sign(&claims(Duration::minutes(5)))).unwrap();

        assert_eq!(verified.sub, "operator-1");
        assert!(verified.scopes().any(|s| s == "org-management"));
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = TokenVerifier::from_secret(SECRET, None, None);
        assert!(verifier.verify(&sign(&claims(Duration::minutes(-10)))).is_err());
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let verifier = TokenVerifier::from_secret(SECRET, Some("https://other.example.com"), None);
        assert!(verifier.verify(&sign(&claims(Duration::minutes(5)))).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = TokenVerifier::from_secret(b"another-secret", None, None);
        assert!(verifier.verify(&sign(&claims(Duration::minutes(5)))).is_err());
    }
}
