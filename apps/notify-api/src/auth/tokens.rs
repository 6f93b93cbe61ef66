//! Access-token verification.
//!
//! Tokens are issued by the CRUD backend and signed with the shared
//! `JWT_SECRET`; the relay only checks them. Signature and expiry checks are
//! delegated to `jsonwebtoken`.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// `token_type` claim of tokens accepted on relay surfaces.
pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Claims carried by a backend access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: u64,
    pub exp: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("expected an access token, got `{0}`")]
    WrongType(String),
}

/// Verify signature, expiry and token type.
pub fn verify_access_token(secret: &str, token: &str) -> Result<AccessClaims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp"]);

    let data = jsonwebtoken::decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;

    if data.claims.token_type != ACCESS_TOKEN_TYPE {
        return Err(TokenError::WrongType(data.claims.token_type));
    }
    Ok(data.claims)
}

/// Mint an access token the way the backend does. Used by tooling and tests.
pub fn mint_access_token(
    secret: &str,
    user_id: u64,
    ttl: chrono::Duration,
) -> Result<String, TokenError> {
    let claims = AccessClaims {
        user_id,
        exp: (chrono::Utc::now() + ttl).timestamp(),
        token_type: ACCESS_TOKEN_TYPE.to_string(),
        jti: Some(agency_common::id::prefixed_ulid("jti")),
    };
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn valid_token_round_trips() {
        let token = mint_access_token(SECRET, 17, chrono::Duration::minutes(5)).unwrap();
        let claims = verify_access_token(SECRET, &token).unwrap();
        assert_eq!(claims.user_id, 17);
        assert_eq!(claims.token_type, ACCESS_TOKEN_TYPE);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = mint_access_token(SECRET, 17, chrono::Duration::minutes(5)).unwrap();
        assert!(matches!(
            verify_access_token("other-secret", &token),
            Err(TokenError::Jwt(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = mint_access_token(SECRET, 17, chrono::Duration::hours(-1)).unwrap();
        assert!(verify_access_token(SECRET, &token).is_err());
    }

    #[test]
    fn refresh_tokens_are_not_access_tokens() {
        let claims = AccessClaims {
            user_id: 17,
            exp: (chrono::Utc::now() + chrono::Duration::minutes(5)).timestamp(),
            token_type: "refresh".to_string(),
            jti: None,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(
            verify_access_token(SECRET, &token),
            Err(TokenError::WrongType(t)) if t == "refresh"
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(verify_access_token(SECRET, "not-a-jwt").is_err());
    }
}
