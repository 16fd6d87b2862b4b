//! Availability checking.
//!
//! A candidate range `[A, B)` conflicts with an existing reservation `[S, E)`
//! iff `S < B && E > A` and the reservation is live: `confirmed`, or `pending`
//! with a hold that has not lapsed. Cancelled, expired and lapsed bookings
//! never block.

use crate::error::BookingError;
use crate::types::{Availability, Booking, BookingId, Conflict, StayDates};
use chrono::{DateTime, NaiveDate, Utc};

/// Validates a requested check-in/check-out pair against `today`.
///
/// # Errors
///
/// Returns [`BookingError::InvalidRange`] when check-out is not after check-in
/// or check-in is not strictly after `today`.
pub fn validate_request(
    checkin: NaiveDate,
    checkout: NaiveDate,
    today: NaiveDate,
) -> Result<StayDates, BookingError> {
    let stay = StayDates::new(checkin, checkout)?;
    ensure_future_checkin(&stay, today)?;
    Ok(stay)
}

/// Check-in must be strictly in the future.
///
/// # Errors
///
/// Returns [`BookingError::InvalidRange`] for a check-in on or before `today`.
pub fn ensure_future_checkin(stay: &StayDates, today: NaiveDate) -> Result<(), BookingError> {
    if stay.start_date() <= today {
        return Err(BookingError::InvalidRange(format!(
            "check-in {} must be after today ({today})",
            stay.start_date()
        )));
    }
    Ok(())
}

/// Live reservations overlapping `stay` at `now`, ordered by check-in.
///
/// `exclude` skips one booking, used when re-validating a booking against the
/// rest of its apartment's calendar.
pub fn find_conflicts<'a>(
    stay: &StayDates,
    bookings: impl IntoIterator<Item = &'a Booking>,
    now: DateTime<Utc>,
    exclude: Option<BookingId>,
) -> Vec<Conflict> {
    let mut conflicts: Vec<Conflict> = bookings
        .into_iter()
        .filter(|booking| Some(booking.id) != exclude)
        .filter(|booking| booking.blocks(now) && booking.stay.overlaps(stay))
        .map(|booking| Conflict {
            booking_id: booking.id,
            stay: booking.stay,
        })
        .collect();
    conflicts.sort_by_key(|conflict| conflict.stay.start_date());
    conflicts
}

/// Availability of `stay` given an apartment's bookings.
pub fn check<'a>(
    stay: &StayDates,
    bookings: impl IntoIterator<Item = &'a Booking>,
    now: DateTime<Utc>,
) -> Availability {
    Availability::from_conflicts(find_conflicts(stay, bookings, now, None))
}
