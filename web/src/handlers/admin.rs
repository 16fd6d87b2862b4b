//! Back-office endpoints. All require the admin role.
//!
//! - PUT /api/admin/apartments/:id - Register or update an apartment
//! - POST /api/admin/bookings/:id/refund - Mark a pending refund as processed
//! - POST /api/admin/sweep - Expire lapsed holds now

use crate::extractors::AdminIdentity;
use crate::state::AppState;
use crate::WebResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use staybook_core::{Apartment, ApartmentId, BookingId, Money, Payment};
use uuid::Uuid;

/// Apartment attributes the booking lifecycle depends on.
#[derive(Debug, Deserialize)]
pub struct PutApartmentRequest {
    /// Whether the apartment is listed
    pub available: bool,
    /// Price per night, in cents
    pub nightly_price: u64,
    /// Maximum number of guests
    pub max_guests: u32,
}

/// Refund processed by the gateway.
#[derive(Debug, Deserialize)]
pub struct CompleteRefundRequest {
    /// Gateway refund ID
    pub refund_id: String,
}

/// Result of a manual sweep.
#[derive(Debug, Serialize)]
pub struct SweepResponse {
    /// Number of holds moved to `expired`
    pub expired: u64,
}

/// Register or update an apartment.
///
/// # Errors
///
/// - 422: `max_guests` is zero
pub async fn put_apartment(
    State(state): State<AppState>,
    AdminIdentity(admin): AdminIdentity,
    Path(apartment_id): Path<Uuid>,
    Json(request): Json<PutApartmentRequest>,
) -> WebResult<StatusCode> {
    state
        .manager
        .put_apartment(
            Apartment {
                id: ApartmentId::from_uuid(apartment_id),
                available: request.available,
                nightly_price: Money::from_cents(request.nightly_price),
                max_guests: request.max_guests,
            },
            &admin,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Mark a pending refund as processed.
///
/// # Errors
///
/// - 409 `INVALID_PAYMENT_STATE`: no refund pending
/// - 404: booking has no payment
pub async fn complete_refund(
    State(state): State<AppState>,
    AdminIdentity(admin): AdminIdentity,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<CompleteRefundRequest>,
) -> WebResult<Json<Payment>> {
    let payment = state
        .manager
        .complete_refund(BookingId::from_uuid(booking_id), request.refund_id, &admin)
        .await?;

    Ok(Json(payment))
}

/// Expire lapsed holds now instead of waiting for the background sweep.
///
/// # Errors
///
/// Returns 500 if storage fails.
pub async fn sweep(
    State(state): State<AppState>,
    AdminIdentity(admin): AdminIdentity,
) -> WebResult<Json<SweepResponse>> {
    tracing::info!(admin = %admin.user_id, "Manual sweep requested");
    let expired = state.manager.sweep_expired_holds().await?;

    Ok(Json(SweepResponse { expired }))
}
