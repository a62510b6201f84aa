//! Per-connection JWT verification. Token issuance lives in the account
//! service; the gateway only validates and extracts the caller identity.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

/// Claims carried by access tokens issued for game connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier.
    pub sub: Uuid,
    /// Issued-at (seconds since epoch).
    pub iat: i64,
    /// Expiry (seconds since epoch).
    pub exp: i64,
}

/// Verify an HS256 token and return the authenticated user id.
pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, ServiceError> {
    let validation = Validation::new(Algorithm::HS256);

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims.sub)
    .map_err(|err| match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            ServiceError::Auth("token expired".into())
        }
        jsonwebtoken::errors::ErrorKind::InvalidSignature => {
            ServiceError::Auth("invalid signature".into())
        }
        _ => ServiceError::Auth("invalid token".into()),
    })
}

/// Mint a short-lived token. Used by tests and local tooling.
pub fn mint_token(user_id: Uuid, secret: &str) -> Result<String, ServiceError> {
    let iat = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| ServiceError::Internal("system clock before epoch".into()))?
        .as_secs() as i64;

    let claims = Claims {
        sub: user_id,
        iat,
        exp: iat + 60 * 60,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| ServiceError::Internal(format!("failed to encode token: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let user_id = Uuid::new_v4();
        let token = mint_token(user_id, "secret-a").unwrap();
        assert_eq!(verify_token(&token, "secret-a").unwrap(), user_id);
    }

    #[test]
    fn bad_signature_rejected() {
        let token = mint_token(Uuid::new_v4(), "secret-a").unwrap();
        assert!(matches!(
            verify_token(&token, "secret-b"),
            Err(ServiceError::Auth(_))
        ));
    }
}
