use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// JWT Claims
// ============================================================================

/// Verified token payload admitting a connection.
///
/// Immutable for the life of the connection: expiry is enforced once at
/// admission and never re-checked, so a connection outlives its token by
/// design of the surrounding system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub user_id: u64,
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
    pub exp: i64,
}

impl Claims {
    pub fn new(
        user_id: u64,
        username: impl Into<String>,
        groups: Vec<String>,
        ttl_minutes: i64,
    ) -> Self {
        Claims {
            user_id,
            username: username.into(),
            groups,
            exp: (Utc::now() + Duration::minutes(ttl_minutes)).timestamp(),
        }
    }

    /// True when the token carries at least one of the required groups.
    pub fn has_any_group(&self, required: &[&str]) -> bool {
        required
            .iter()
            .any(|needed| self.groups.iter().any(|have| have == needed))
    }
}

// ============================================================================
// Verification
// ============================================================================

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token is expired")]
    Expired,

    #[error("token is malformed")]
    Malformed,
}

/// Verify an HS256-signed bearer token and return its claims.
///
/// Pure function of the token bytes and the symmetric secret; called once
/// per connection at admission.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AuthError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::warn!(error = ?e, "Token validation failed");
        match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            _ => AuthError::Malformed,
        }
    })
}

/// Sign claims into a compact token. Used by the `gen-token` dev tool and
/// by tests; the gateway itself never issues tokens.
pub fn sign_token(claims: &Claims, secret: &str) -> Result<String, AuthError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(error = ?e, "Failed to sign token");
        AuthError::Malformed
    })
}

// ============================================================================
// Tests
// ============================================================================
