//! Error taxonomy for the booking lifecycle.
//!
//! Every guard in the lifecycle fails with its own variant so callers can
//! explain exactly which rule rejected a request. Only storage races
//! ([`StoreError::Stale`], [`StoreError::Overlap`]) are decided again by the
//! manager; nothing else is retried.

use crate::types::{ApartmentId, BookingId, BookingStatus, Conflict, PaymentStatus};
use chrono::NaiveDate;
use thiserror::Error;

/// Errors returned by booking lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Check-in/check-out dates are illogical (past check-in, empty or
    /// inverted range).
    #[error("Invalid stay dates: {0}")]
    InvalidRange(String),

    /// Request is malformed for a reason other than its dates.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The requested range overlaps live reservations.
    #[error("Requested dates overlap {} existing reservation(s)", conflicts.len())]
    Conflict {
        /// Reservations blocking the request
        conflicts: Vec<Conflict>,
    },

    /// Apartment, booking or payment does not exist (or is not bookable).
    #[error("{resource} {id} not found")]
    NotFound {
        /// Kind of resource
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Booking already reached a terminal state.
    #[error("Booking {booking_id} is already {status}")]
    AlreadyTerminal {
        /// Booking ID
        booking_id: BookingId,
        /// Terminal status the booking is in
        status: BookingStatus,
    },

    /// Confirmed booking whose check-in date has arrived.
    #[error("Booking {booking_id} can no longer be cancelled: check-in was {start_date}")]
    TooLate {
        /// Booking ID
        booking_id: BookingId,
        /// Check-in date of the booking
        start_date: NaiveDate,
    },

    /// Hold lapsed and its dates were taken in the meantime.
    #[error("Hold on booking {booking_id} expired and its dates are no longer free")]
    Expired {
        /// Booking ID
        booking_id: BookingId,
    },

    /// Acting identity is not allowed to perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Payment is not in the state the operation requires.
    #[error("Payment for booking {booking_id} is {status}, expected {expected}")]
    InvalidPaymentState {
        /// Booking ID
        booking_id: BookingId,
        /// Current payment status
        status: PaymentStatus,
        /// Status the operation requires
        expected: PaymentStatus,
    },

    /// Storage collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Shorthand for [`BookingError::NotFound`].
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

/// Errors reported by a [`crate::store::BookingStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Storage-level overlap guard rejected a write.
    #[error("Overlapping reservation on apartment {apartment_id}")]
    Overlap {
        /// Apartment whose calendar rejected the write
        apartment_id: ApartmentId,
    },

    /// A row the commit was decided on changed before the commit landed.
    #[error("Booking {booking_id} changed concurrently")]
    Stale {
        /// Booking whose snapshot is out of date
        booking_id: BookingId,
    },

    /// Database connection or query failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back to the domain.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}
