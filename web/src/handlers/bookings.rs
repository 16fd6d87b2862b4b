//! Booking endpoints.
//!
//! - POST /api/bookings - Place a temporary hold (requires auth)
//! - GET /api/bookings - List the caller's bookings (admins see all)
//! - GET /api/bookings/:id - Booking with payment and history
//! - POST /api/bookings/:id/cancel - Cancel (owner or admin)
//! - POST /api/bookings/:id/confirm - Confirm a hold (admin)
//!
//! # Lifecycle
//!
//! ```text
//! pending ──paid──→ confirmed ──cancel──→ cancelled
//!    │                                       ↑
//!    ├──────────────cancel───────────────────┘
//!    └──hold lapses──→ expired
//! ```

use crate::extractors::{AdminIdentity, Identity};
use crate::state::AppState;
use crate::WebResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use staybook_core::manager::{BookingDetails, HoldReceipt, HoldRequest};
use staybook_core::{ApartmentId, Booking, BookingId, NaiveDate};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to hold an apartment's dates.
#[derive(Debug, Deserialize)]
pub struct CreateHoldRequest {
    /// Apartment to book
    pub apartment_id: Uuid,
    /// First night
    pub checkin: NaiveDate,
    /// Departure day (exclusive)
    pub checkout: NaiveDate,
    /// Number of guests
    pub guests: u32,
}

/// Listing of bookings.
#[derive(Debug, Serialize)]
pub struct BookingListResponse {
    /// Bookings, newest first
    pub bookings: Vec<Booking>,
    /// Number of bookings returned
    pub total: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Place a temporary hold.
///
/// The hold lapses after the configured hold window unless paid.
///
/// # Errors
///
/// - 409 `CONFLICT`: the dates overlap live reservations
/// - 422: invalid dates or guest count
/// - 404: apartment missing or unlisted
pub async fn create_hold(
    State(state): State<AppState>,
    Identity(actor): Identity,
    Json(request): Json<CreateHoldRequest>,
) -> WebResult<(StatusCode, Json<HoldReceipt>)> {
    let receipt = state
        .manager
        .create_temp_booking(
            HoldRequest {
                apartment_id: ApartmentId::from_uuid(request.apartment_id),
                checkin: request.checkin,
                checkout: request.checkout,
                guests: request.guests,
            },
            &actor,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// List bookings visible to the caller.
///
/// # Errors
///
/// Returns 500 if storage fails.
pub async fn list_bookings(
    State(state): State<AppState>,
    Identity(actor): Identity,
) -> WebResult<Json<BookingListResponse>> {
    let bookings = state.manager.list_bookings(&actor).await?;
    let total = bookings.len();

    Ok(Json(BookingListResponse { bookings, total }))
}

/// Get a booking with its payment and activity history.
///
/// # Errors
///
/// - 404: unknown booking
/// - 403: not the owner
pub async fn get_booking(
    State(state): State<AppState>,
    Identity(actor): Identity,
    Path(booking_id): Path<Uuid>,
) -> WebResult<Json<BookingDetails>> {
    let details = state
        .manager
        .get_booking(BookingId::from_uuid(booking_id), &actor)
        .await?;

    Ok(Json(details))
}

/// Cancel a booking.
///
/// Paid bookings move their payment to `refund_pending`.
///
/// # Errors
///
/// - 409 `ALREADY_TERMINAL`: already cancelled or expired
/// - 409 `TOO_LATE`: confirmed and check-in has arrived
/// - 403: not the owner
pub async fn cancel_booking(
    State(state): State<AppState>,
    Identity(actor): Identity,
    Path(booking_id): Path<Uuid>,
) -> WebResult<Json<Booking>> {
    let booking = state
        .manager
        .cancel_booking(BookingId::from_uuid(booking_id), &actor)
        .await?;

    Ok(Json(booking))
}

/// Confirm a hold directly.
///
/// # Errors
///
/// - 410 `HOLD_EXPIRED`: the hold lapsed and its dates were taken
/// - 409 `ALREADY_TERMINAL`: booking cancelled
pub async fn confirm_booking(
    State(state): State<AppState>,
    AdminIdentity(admin): AdminIdentity,
    Path(booking_id): Path<Uuid>,
) -> WebResult<Json<Booking>> {
    tracing::info!(admin = %admin.user_id, %booking_id, "Admin confirming booking");
    let booking = state
        .manager
        .confirm_booking(BookingId::from_uuid(booking_id))
        .await?;

    Ok(Json(booking))
}
