//! Payment gateway callbacks, relayed by the payments service.
//!
//! - POST /api/payments/confirm - Charge succeeded (admin)
//! - POST /api/payments/fail - Charge failed (admin)

use crate::extractors::AdminIdentity;
use crate::state::AppState;
use crate::WebResult;
use axum::{extract::State, Json};
use serde::Deserialize;
use staybook_core::manager::{PaymentNotice, PaymentReceipt};
use staybook_core::{BookingId, Money, Payment};
use uuid::Uuid;

/// Successful charge reported by the gateway.
#[derive(Debug, Deserialize)]
pub struct PaymentConfirmedRequest {
    /// Booking paid for
    pub booking_id: Uuid,
    /// Gateway transaction ID
    pub transaction_id: String,
    /// Amount charged, in cents
    pub amount: u64,
}

/// Failed charge reported by the gateway.
#[derive(Debug, Deserialize)]
pub struct PaymentFailedRequest {
    /// Booking the charge was for
    pub booking_id: Uuid,
    /// Gateway failure reason
    pub reason: String,
}

/// Record a paid charge and confirm the booking.
///
/// A charge for a hold that lapsed and lost its dates is kept and marked
/// for refund; `confirmed` is `false` in that case. Redelivered notices
/// return the recorded outcome unchanged.
///
/// # Errors
///
/// - 422: amount does not match the booking total
/// - 404: unknown booking
/// - 409 `CONCURRENT_UPDATE`: the booking kept changing under the request
pub async fn payment_confirmed(
    State(state): State<AppState>,
    AdminIdentity(admin): AdminIdentity,
    Json(request): Json<PaymentConfirmedRequest>,
) -> WebResult<Json<PaymentReceipt>> {
    let receipt = state
        .manager
        .record_payment(
            PaymentNotice {
                booking_id: BookingId::from_uuid(request.booking_id),
                transaction_id: request.transaction_id,
                amount: Money::from_cents(request.amount),
            },
            &admin,
        )
        .await?;

    Ok(Json(receipt))
}

/// Record a failed charge. The hold keeps running until it lapses.
///
/// # Errors
///
/// - 409 `INVALID_PAYMENT_STATE`: booking already paid
/// - 404: unknown booking
pub async fn payment_failed(
    State(state): State<AppState>,
    AdminIdentity(admin): AdminIdentity,
    Json(request): Json<PaymentFailedRequest>,
) -> WebResult<Json<Payment>> {
    let payment = state
        .manager
        .fail_payment(BookingId::from_uuid(request.booking_id), request.reason, &admin)
        .await?;

    Ok(Json(payment))
}
