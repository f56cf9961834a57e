use crate::error::{GatewayError, Result};
use axum::http::HeaderMap;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Claims carried by the identity service's access tokens (HS256, short-lived).
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject identifier
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Display name, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: usize,
    /// Issued at (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<usize>,
}

/// The authenticated identity attached to a request. Request-scoped, never
/// persisted; the subject id is what gets propagated upstream.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject_id: String,
}

/// Stateless bearer credential validator.
///
/// Needs only the credential and the shared verification secret; no store
/// lookups, so validation never blocks on I/O.
pub struct TokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenValidator {
    pub fn new(secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }

    /// Validate the `Authorization: Bearer` credential and extract the subject.
    ///
    /// Fails with `Unauthenticated` when the header is absent,
    /// `InvalidCredential` when malformed or the signature does not verify,
    /// `ExpiredCredential` when past its validity window.
    pub fn validate(&self, headers: &HeaderMap) -> Result<AuthContext> {
        let token = self.extract_token(headers)?;

        let token_data =
            decode::<Claims>(&token, &self.decoding_key, &self.validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => GatewayError::ExpiredCredential,
                    _ => GatewayError::InvalidCredential(e.to_string()),
                }
            })?;

        Ok(AuthContext {
            subject_id: token_data.claims.user_id,
        })
    }

    fn extract_token(&self, headers: &HeaderMap) -> Result<String> {
        let auth_header = headers
            .get("authorization")
            .ok_or(GatewayError::Unauthenticated)?;

        let auth_str = auth_header.to_str().map_err(|_| {
            GatewayError::InvalidCredential("authorization header is not valid UTF-8".to_string())
        })?;

        auth_str
            .strip_prefix("Bearer ")
            .or_else(|| auth_str.strip_prefix("bearer "))
            .map(|t| t.to_string())
            .ok_or_else(|| {
                GatewayError::InvalidCredential(
                    "authorization header must start with 'Bearer '".to_string(),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-verification-secret";

    fn make_token(secret: &str, claims: &Claims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn validator() -> TokenValidator {
        TokenValidator::new(&SecretString::new(SECRET.to_string()))
    }

    fn bearer_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", format!("Bearer {}", token).parse().unwrap());
        headers
    }

    #[test]
    fn test_valid_token_yields_subject() {
        let claims = Claims {
            user_id: "u123".to_string(),
            username: Some("alice".to_string()),
            exp: (chrono::Utc::now() + chrono::Duration::minutes(15)).timestamp() as usize,
            iat: Some(chrono::Utc::now().timestamp() as usize),
        };

        let ctx = validator()
            .validate(&bearer_headers(&make_token(SECRET, &claims)))
            .unwrap();
        assert_eq!(ctx.subject_id, "u123");
    }

    #[test]
    fn test_missing_header_is_unauthenticated() {
        let err = validator().validate(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, GatewayError::Unauthenticated));
    }

    #[test]
    fn test_expired_token() {
        let claims = Claims {
            user_id: "u123".to_string(),
            username: None,
            exp: (chrono::Utc::now() - chrono::Duration::hours(1)).timestamp() as usize,
            iat: None,
        };

        let err = validator()
            .validate(&bearer_headers(&make_token(SECRET, &claims)))
            .unwrap_err();
        assert!(matches!(err, GatewayError::ExpiredCredential));
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let claims = Claims {
            user_id: "u123".to_string(),
            username: None,
            exp: (chrono::Utc::now() + chrono::Duration::minutes(15)).timestamp() as usize,
            iat: None,
        };

        let err = validator()
            .validate(&bearer_headers(&make_token("some-other-secret", &claims)))
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidCredential(_)));
    }

    #[test]
    fn test_non_bearer_scheme_is_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());

        let err = validator().validate(&headers).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidCredential(_)));
    }

    #[test]
    fn test_garbage_token_is_invalid() {
        let err = validator()
            .validate(&bearer_headers("not.a.jwt"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidCredential(_)));
    }
}
