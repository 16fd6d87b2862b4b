//! Custom Axum extractors.
//!
//! - `CorrelationId`: Extract or generate request correlation IDs
//! - `BearerToken`: Raw token from `Authorization: Bearer <token>`
//! - `Identity`: Verified caller, required for every booking endpoint
//! - `AdminIdentity`: Verified caller holding the admin role
//!
//! # Examples
//!
//! ```ignore
//! async fn cancel(
//!     State(state): State<AppState>,
//!     Identity(actor): Identity,
//!     Path(id): Path<Uuid>,
//! ) -> Result<Json<Booking>, AppError> {
//!     let booking = state.manager.cancel_booking(BookingId::from_uuid(id), &actor).await?;
//!     Ok(Json(booking))
//! }
//! ```

use crate::error::AppError;
use crate::middleware::{CorrelationIdExt, CORRELATION_ID_HEADER};
use crate::state::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use staybook_core::AuthContext;
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Extracts the correlation ID from the `X-Correlation-ID` header,
/// or generates a new UUID v4 if not present.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // The middleware has usually parsed it already
        if let Some(id) = parts.correlation_id() {
            return Ok(Self(id));
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Bearer token extracted from `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        let token = value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| AppError::unauthorized("Authorization header must be 'Bearer <token>'"))?;

        Ok(Self(token.to_string()))
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct Identity(pub AuthContext);

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;

        let identity = state.verifier.verify(&token).map_err(|e| {
            tracing::debug!(
                correlation_id = ?parts.correlation_id(),
                error = %e,
                "Rejected bearer token"
            );
            AppError::unauthorized(e.to_string())
        })?;

        Ok(Self(identity))
    }
}

/// Authenticated caller with the admin role.
#[derive(Debug, Clone, Copy)]
pub struct AdminIdentity(pub AuthContext);

#[async_trait]
impl FromRequestParts<AppState> for AdminIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Identity(identity) = Identity::from_request_parts(parts, state).await?;

        if !identity.is_admin() {
            tracing::warn!(user_id = %identity.user_id, "Non-admin attempted admin operation");
            return Err(AppError::forbidden("Admin role required"));
        }

        Ok(Self(identity))
    }
}
