//! Session tokens.
//!
//! Sessions are a pair of HS256-signed JWTs: a short-lived access token sent
//! as `Authorization: Bearer <token>` on every request, and a long-lived
//! refresh token exchanged for a new pair at `/auth/refresh`.

use crate::constants::TOKEN_ISSUER;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("failed to create token: {0}")]
    Create(String),

    #[error("token has expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("expected {expected} token, got {actual}")]
    WrongType {
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// JWT claims. `sub` is the identity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub token_type: TokenType,
}

impl Claims {
    pub fn new(user_id: Uuid, email: &str, token_type: TokenType, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id,
            email: email.to_string(),
            iss: TOKEN_ISSUER.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type,
        }
    }
}

/// Holds the signing secret and token lifetimes.
#[derive(Clone)]
pub struct TokenKeys {
    secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: impl Into<String>, access_ttl_secs: i64, refresh_ttl_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            access_ttl: Duration::seconds(access_ttl_secs),
            refresh_ttl: Duration::seconds(refresh_ttl_secs),
        }
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    pub fn issue(&self, user_id: Uuid, email: &str, token_type: TokenType) -> Result<String, JwtError> {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        self.sign(&Claims::new(user_id, email, token_type, ttl))
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        let key = EncodingKey::from_secret(self.secret.as_bytes());
        encode(&Header::new(Algorithm::HS256), claims, &key)
            .map_err(|e| JwtError::Create(e.to_string()))
    }

    /// Checks signature, issuer, `exp`/`nbf`, and the token type.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, JwtError> {
        let key = DecodingKey::from_secret(self.secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &key, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid(e.to_string()),
        })?;

        if data.claims.token_type != expected {
            return Err(JwtError::WrongType {
                expected: expected.as_str(),
                actual: data.claims.token_type.as_str(),
            });
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

    fn keys() -> TokenKeys {
        TokenKeys::new(SECRET, 3600, 86400)
    }

    #[test]
    fn access_token_round_trip() {
        let user_id = Uuid::new_v4();
        let token = keys().issue(user_id, "reader@example.com", TokenType::Access).unwrap();
        let claims = keys().verify(&token, TokenType::Access).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.email, "reader@example.com");
        assert_eq!(claims.iss, TOKEN_ISSUER);
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let token = keys()
            .issue(Uuid::new_v4(), "reader@example.com", TokenType::Refresh)
            .unwrap();
        let err = keys().verify(&token, TokenType::Access).unwrap_err();
        assert!(matches!(err, JwtError::WrongType { expected: "access", .. }));
    }

    #[test]
    fn expired_token_is_rejected() {
        let claims = Claims::new(
            Uuid::new_v4(),
            "reader@example.com",
            TokenType::Access,
            Duration::seconds(-120),
        );
        let token = keys().sign(&claims).unwrap();
        assert!(matches!(
            keys().verify(&token, TokenType::Access),
            Err(JwtError::Expired)
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let other = TokenKeys::new("another-secret-that-is-also-32-bytes!!", 3600, 3600);
        let token = other
            .issue(Uuid::new_v4(), "reader@example.com", TokenType::Access)
            .unwrap();
        assert!(matches!(
            keys().verify(&token, TokenType::Access),
            Err(JwtError::Invalid(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(keys().verify("not-a-jwt", TokenType::Access).is_err());
    }
}
