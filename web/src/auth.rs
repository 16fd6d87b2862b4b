//! Identity verification for bearer tokens.
//!
//! The booking API does not issue credentials. It trusts tokens minted by
//! the identity provider and turns them into an [`AuthContext`] that the
//! booking manager checks against ownership and role.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use staybook_core::{AuthContext, Role, UserId};
use thiserror::Error;
use uuid::Uuid;

/// Reasons a bearer token is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Token is past its `exp` claim
    #[error("Token has expired")]
    Expired,

    /// Signature does not match the shared secret
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Token is malformed or carries unusable claims
    #[error("Invalid token: {0}")]
    Invalid(String),
}

/// Turns a bearer token into the identity acting on the booking lifecycle.
pub trait IdentityVerifier: Send + Sync {
    /// Verify `token` and return who it speaks for.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if the token cannot be trusted.
    fn verify(&self, token: &str) -> Result<AuthContext, AuthError>;
}

/// Claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID (subject)
    pub sub: Uuid,
    /// Role of the user
    pub role: Role,
    /// Expiry as a Unix timestamp
    pub exp: i64,
}

/// HS256 verifier sharing a secret with the identity provider.
#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtVerifier {
    /// Creates a verifier for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Mint a token for `identity`, valid until `expires_at`.
    ///
    /// Used by operator tooling and tests; production tokens come from the
    /// identity provider.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Invalid`] if encoding fails.
    pub fn issue(
        &self,
        identity: &AuthContext,
        expires_at: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let claims = Claims {
            sub: *identity.user_id.as_uuid(),
            role: identity.role,
            exp: expires_at.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<AuthContext, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub", "exp"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        Ok(AuthContext {
            user_id: UserId::from_uuid(data.claims.sub),
            role: data.claims.role,
        })
    }
}
