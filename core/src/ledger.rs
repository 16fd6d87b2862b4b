//! Reservation ledger for one apartment.
//!
//! The [`LedgerReducer`] owns the booking state machine:
//!
//! ```text
//!            PlaceHold
//!               │
//!               ▼
//!   ┌────── Pending ──────┐
//!   │ Confirm      lapse  │
//!   ▼                     ▼
//! Confirmed ◀─Confirm── Expired      (resurrect only if still free)
//!   │ Cancel
//!   ▼
//! Cancelled ◀─Cancel── Pending
//! ```
//!
//! and the payment transitions that drive it
//! (`pending → paid → refund_pending → refunded`, or `failed`).
//!
//! The reducer works on a [`LedgerState`] snapshot holding the apartment and
//! every booking of that apartment relevant to the action. It is pure: all
//! writes are returned as [`LedgerEffect`] values and the caller is
//! responsible for applying them atomically.

use crate::availability;
use crate::environment::LedgerEnvironment;
use crate::error::BookingError;
use crate::reducer::Reducer;
use crate::types::{
    Activity, ActivityKind, Apartment, ApartmentId, AuthContext, Booking, BookingId,
    BookingStatus, Conflict, Money, Payment, PaymentId, PaymentStatus, StayDates, UserId,
};
use chrono::{DateTime, Utc};
use smallvec::{smallvec, SmallVec};
use std::collections::HashMap;

// ============================================================================
// State
// ============================================================================

/// Snapshot of an apartment's calendar and the payments of its bookings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerState {
    /// The apartment, if it exists
    pub apartment: Option<Apartment>,
    /// Bookings by ID
    pub bookings: HashMap<BookingId, Booking>,
    /// Payments by booking ID
    pub payments: HashMap<BookingId, Payment>,
}

impl LedgerState {
    /// Creates an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger for `apartment` seeded with `bookings`.
    #[must_use]
    pub fn for_apartment(apartment: Option<Apartment>, bookings: Vec<Booking>) -> Self {
        Self {
            apartment,
            bookings: bookings.into_iter().map(|b| (b.id, b)).collect(),
            payments: HashMap::new(),
        }
    }

    /// Adds or replaces a booking
    pub fn insert_booking(&mut self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    /// Adds or replaces a payment
    pub fn insert_payment(&mut self, payment: Payment) {
        self.payments.insert(payment.booking_id, payment);
    }

    /// Get a booking by ID
    #[must_use]
    pub fn booking(&self, id: &BookingId) -> Option<&Booking> {
        self.bookings.get(id)
    }

    /// Get the payment of a booking
    #[must_use]
    pub fn payment(&self, booking_id: &BookingId) -> Option<&Payment> {
        self.payments.get(booking_id)
    }

    /// Live bookings overlapping `stay` at `now`
    #[must_use]
    pub fn conflicts(
        &self,
        stay: &StayDates,
        now: DateTime<Utc>,
        exclude: Option<BookingId>,
    ) -> Vec<Conflict> {
        availability::find_conflicts(stay, self.bookings.values(), now, exclude)
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Commands accepted by the ledger.
///
/// Every command carries the single `now` read at the start of the operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerAction {
    /// Hold a date range for a guest while they pay
    PlaceHold {
        /// ID for the new booking
        booking_id: BookingId,
        /// Apartment to book
        apartment_id: ApartmentId,
        /// Guest placing the hold
        user_id: UserId,
        /// Requested nights
        stay: StayDates,
        /// Number of guests
        guests: u32,
        /// Operation time
        now: DateTime<Utc>,
    },

    /// Confirm a held booking
    Confirm {
        /// Booking ID
        booking_id: BookingId,
        /// Operation time
        now: DateTime<Utc>,
    },

    /// Cancel a booking on behalf of `actor`
    Cancel {
        /// Booking ID
        booking_id: BookingId,
        /// Acting identity
        actor: AuthContext,
        /// Operation time
        now: DateTime<Utc>,
    },

    /// Gateway confirmed a charge for the booking
    RecordPayment {
        /// Booking ID
        booking_id: BookingId,
        /// ID to use if no payment exists yet
        payment_id: PaymentId,
        /// Gateway transaction ID
        transaction_id: String,
        /// Amount charged
        amount: Money,
        /// Operation time
        now: DateTime<Utc>,
    },

    /// Gateway rejected a charge for the booking
    FailPayment {
        /// Booking ID
        booking_id: BookingId,
        /// ID to use if no payment exists yet
        payment_id: PaymentId,
        /// Gateway failure reason
        reason: String,
        /// Operation time
        now: DateTime<Utc>,
    },

    /// Admin processed the refund of a cancelled paid booking
    CompleteRefund {
        /// Booking ID
        booking_id: BookingId,
        /// Gateway refund ID
        refund_id: String,
        /// Acting identity
        actor: AuthContext,
        /// Operation time
        now: DateTime<Utc>,
    },
}

// ============================================================================
// Effects
// ============================================================================

/// Writes produced by the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEffect {
    /// Insert a new pending booking
    InsertHold(Booking),
    /// Persist a booking's new status
    UpdateBooking(Booking),
    /// Insert or update a booking's payment
    SavePayment(Payment),
    /// Record an activity for the booking owner
    Record(Activity),
}

type Effects = SmallVec<[LedgerEffect; 4]>;

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the reservation ledger.
#[derive(Clone, Copy, Debug, Default)]
pub struct LedgerReducer;

impl LedgerReducer {
    /// Creates a new `LedgerReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn booking<'s>(state: &'s LedgerState, id: &BookingId) -> Result<&'s Booking, BookingError> {
        state
            .booking(id)
            .ok_or_else(|| BookingError::not_found("booking", id))
    }

    fn place_hold(
        state: &mut LedgerState,
        env: &LedgerEnvironment,
        action: PlaceHold,
    ) -> Result<Effects, BookingError> {
        let apartment = state
            .apartment
            .as_ref()
            .filter(|apartment| apartment.id == action.apartment_id && apartment.available)
            .ok_or_else(|| BookingError::not_found("apartment", action.apartment_id))?;

        availability::ensure_future_checkin(&action.stay, action.now.date_naive())?;

        if action.guests == 0 || action.guests > apartment.max_guests {
            return Err(BookingError::Validation(format!(
                "guests must be between 1 and {} (requested: {})",
                apartment.max_guests, action.guests
            )));
        }

        let conflicts = state.conflicts(&action.stay, action.now, None);
        if !conflicts.is_empty() {
            return Err(BookingError::Conflict { conflicts });
        }

        let nights = action.stay.nights();
        let discount = env.offers.discount_percent(apartment, &action.stay);
        let total_amount = apartment
            .nightly_price
            .checked_multiply(nights)
            .and_then(|base| base.checked_apply_discount(discount))
            .ok_or_else(|| {
                BookingError::Validation(format!(
                    "cannot price {nights} nights at {} with a {discount}% discount",
                    apartment.nightly_price
                ))
            })?;

        let booking = Booking {
            id: action.booking_id,
            apartment_id: action.apartment_id,
            user_id: action.user_id,
            stay: action.stay,
            status: BookingStatus::Pending,
            expires_at: Some(action.now + env.policy.hold_duration),
            total_amount,
            nights,
            guests: action.guests,
            created_at: action.now,
            updated_at: action.now,
        };

        let activity = Activity::for_booking(
            &booking,
            ActivityKind::HoldPlaced,
            format!(
                "Dates {} held for {nights} night(s), total {total_amount}",
                booking.stay
            ),
            action.now,
        );

        state.insert_booking(booking.clone());
        Ok(smallvec![
            LedgerEffect::InsertHold(booking),
            LedgerEffect::Record(activity)
        ])
    }

    /// Confirms a booking, resurrecting a lapsed hold if its dates are still
    /// free. Shared by `Confirm` and `RecordPayment`.
    fn confirm(
        state: &mut LedgerState,
        booking_id: BookingId,
        now: DateTime<Utc>,
    ) -> Result<Effects, BookingError> {
        let booking = Self::booking(state, &booking_id)?;

        match booking.effective_status(now) {
            BookingStatus::Confirmed => return Ok(SmallVec::new()),
            BookingStatus::Cancelled => {
                return Err(BookingError::AlreadyTerminal {
                    booking_id,
                    status: BookingStatus::Cancelled,
                });
            }
            BookingStatus::Expired => {
                if !state.conflicts(&booking.stay, now, Some(booking_id)).is_empty() {
                    return Err(BookingError::Expired { booking_id });
                }
                tracing::info!(%booking_id, "Resurrecting lapsed hold, dates still free");
            }
            BookingStatus::Pending => {}
        }

        let mut confirmed = booking.clone();
        confirmed.status = BookingStatus::Confirmed;
        confirmed.expires_at = None;
        confirmed.updated_at = now;

        let activity = Activity::for_booking(
            &confirmed,
            ActivityKind::BookingConfirmed,
            format!("Booking for {} confirmed", confirmed.stay),
            now,
        );

        state.insert_booking(confirmed.clone());
        Ok(smallvec![
            LedgerEffect::UpdateBooking(confirmed),
            LedgerEffect::Record(activity)
        ])
    }

    fn cancel(
        state: &mut LedgerState,
        booking_id: BookingId,
        actor: AuthContext,
        now: DateTime<Utc>,
    ) -> Result<Effects, BookingError> {
        let booking = Self::booking(state, &booking_id)?;

        if !actor.can_act_for(booking.user_id) {
            return Err(BookingError::Forbidden(format!(
                "booking {booking_id} belongs to another user"
            )));
        }

        let status = booking.effective_status(now);
        if status.is_terminal() {
            return Err(BookingError::AlreadyTerminal { booking_id, status });
        }

        if status == BookingStatus::Confirmed && booking.stay.start_date() <= now.date_naive() {
            return Err(BookingError::TooLate {
                booking_id,
                start_date: booking.stay.start_date(),
            });
        }

        let mut cancelled = booking.clone();
        cancelled.status = BookingStatus::Cancelled;
        cancelled.expires_at = None;
        cancelled.updated_at = now;

        let mut effects: Effects = smallvec![
            LedgerEffect::UpdateBooking(cancelled.clone()),
            LedgerEffect::Record(Activity::for_booking(
                &cancelled,
                ActivityKind::BookingCancelled,
                format!("Booking for {} cancelled", cancelled.stay),
                now,
            )),
        ];

        if let Some(payment) = state
            .payment(&booking_id)
            .filter(|payment| payment.status == PaymentStatus::Paid)
        {
            let mut refund = payment.clone();
            refund.status = PaymentStatus::RefundPending;
            refund.updated_at = now;

            effects.push(LedgerEffect::Record(Activity::for_booking(
                &cancelled,
                ActivityKind::RefundRequested,
                format!("Refund of {} requested", refund.amount),
                now,
            )));
            effects.push(LedgerEffect::SavePayment(refund.clone()));
            state.insert_payment(refund);
        }

        state.insert_booking(cancelled);
        Ok(effects)
    }

    fn record_payment(
        state: &mut LedgerState,
        action: RecordPayment,
    ) -> Result<Effects, BookingError> {
        let booking = Self::booking(state, &action.booking_id)?;

        if action.amount != booking.total_amount {
            return Err(BookingError::Validation(format!(
                "payment of {} does not match booking total {}",
                action.amount, booking.total_amount
            )));
        }

        let existing = state.payment(&action.booking_id);
        if existing.is_some_and(|payment| payment.status.is_settled()) {
            return Ok(SmallVec::new());
        }

        let mut payment = existing.cloned().unwrap_or_else(|| Payment {
            id: action.payment_id,
            booking_id: action.booking_id,
            status: PaymentStatus::Pending,
            amount: action.amount,
            transaction_id: None,
            failure_reason: None,
            paid_at: None,
            refund_id: None,
            refund_time: None,
            created_at: action.now,
            updated_at: action.now,
        });
        payment.status = PaymentStatus::Paid;
        payment.amount = action.amount;
        payment.transaction_id = Some(action.transaction_id);
        payment.failure_reason = None;
        payment.paid_at = Some(action.now);
        payment.updated_at = action.now;

        // Work on a copy so a rejected confirmation cannot leave half-applied state.
        let mut draft = state.clone();
        match Self::confirm(&mut draft, action.booking_id, action.now) {
            Ok(confirm_effects) => {
                *state = draft;
                let mut effects: Effects = smallvec![LedgerEffect::SavePayment(payment.clone())];
                effects.extend(confirm_effects);
                state.insert_payment(payment);
                Ok(effects)
            }
            Err(BookingError::Expired { .. } | BookingError::AlreadyTerminal { .. }) => {
                let booking = Self::booking(state, &action.booking_id)?;
                tracing::warn!(
                    booking_id = %action.booking_id,
                    "Payment arrived for a booking that can no longer be confirmed"
                );
                payment.status = PaymentStatus::RefundPending;
                let activity = Activity::for_booking(
                    booking,
                    ActivityKind::LatePayment,
                    format!(
                        "Payment of {} arrived after the hold on {} was lost; refund requested",
                        payment.amount, booking.stay
                    ),
                    action.now,
                );
                state.insert_payment(payment.clone());
                Ok(smallvec![
                    LedgerEffect::SavePayment(payment),
                    LedgerEffect::Record(activity)
                ])
            }
            Err(other) => Err(other),
        }
    }

    fn fail_payment(
        state: &mut LedgerState,
        booking_id: BookingId,
        payment_id: PaymentId,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<Effects, BookingError> {
        let booking = Self::booking(state, &booking_id)?;

        let mut payment = match state.payment(&booking_id) {
            Some(payment) if payment.status.is_settled() => {
                return Err(BookingError::InvalidPaymentState {
                    booking_id,
                    status: payment.status,
                    expected: PaymentStatus::Pending,
                });
            }
            Some(payment) => payment.clone(),
            None => Payment {
                id: payment_id,
                booking_id,
                status: PaymentStatus::Pending,
                amount: booking.total_amount,
                transaction_id: None,
                failure_reason: None,
                paid_at: None,
                refund_id: None,
                refund_time: None,
                created_at: now,
                updated_at: now,
            },
        };
        payment.status = PaymentStatus::Failed;
        payment.failure_reason = Some(reason);
        payment.updated_at = now;

        state.insert_payment(payment.clone());
        Ok(smallvec![LedgerEffect::SavePayment(payment)])
    }

    fn complete_refund(
        state: &mut LedgerState,
        booking_id: BookingId,
        refund_id: String,
        actor: AuthContext,
        now: DateTime<Utc>,
    ) -> Result<Effects, BookingError> {
        if !actor.is_admin() {
            return Err(BookingError::Forbidden(
                "only admins can process refunds".to_string(),
            ));
        }

        let booking = Self::booking(state, &booking_id)?;
        let payment = state
            .payment(&booking_id)
            .ok_or_else(|| BookingError::not_found("payment for booking", booking_id))?;

        if payment.status != PaymentStatus::RefundPending {
            return Err(BookingError::InvalidPaymentState {
                booking_id,
                status: payment.status,
                expected: PaymentStatus::RefundPending,
            });
        }

        let mut refunded = payment.clone();
        refunded.status = PaymentStatus::Refunded;
        refunded.refund_id = Some(refund_id);
        refunded.refund_time = Some(now);
        refunded.updated_at = now;

        let activity = Activity::for_booking(
            booking,
            ActivityKind::RefundCompleted,
            format!("Refund of {} processed", refunded.amount),
            now,
        );

        state.insert_payment(refunded.clone());
        Ok(smallvec![
            LedgerEffect::SavePayment(refunded),
            LedgerEffect::Record(activity)
        ])
    }
}

/// Fields of [`LedgerAction::PlaceHold`].
struct PlaceHold {
    booking_id: BookingId,
    apartment_id: ApartmentId,
    user_id: UserId,
    stay: StayDates,
    guests: u32,
    now: DateTime<Utc>,
}

/// Fields of [`LedgerAction::RecordPayment`].
struct RecordPayment {
    booking_id: BookingId,
    payment_id: PaymentId,
    transaction_id: String,
    amount: Money,
    now: DateTime<Utc>,
}

impl Reducer for LedgerReducer {
    type State = LedgerState;
    type Action = LedgerAction;
    type Environment = LedgerEnvironment;
    type Effect = LedgerEffect;
    type Error = BookingError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<Effects, BookingError> {
        match action {
            LedgerAction::PlaceHold {
                booking_id,
                apartment_id,
                user_id,
                stay,
                guests,
                now,
            } => Self::place_hold(
                state,
                env,
                PlaceHold {
                    booking_id,
                    apartment_id,
                    user_id,
                    stay,
                    guests,
                    now,
                },
            ),

            LedgerAction::Confirm { booking_id, now } => Self::confirm(state, booking_id, now),

            LedgerAction::Cancel {
                booking_id,
                actor,
                now,
            } => Self::cancel(state, booking_id, actor, now),

            LedgerAction::RecordPayment {
                booking_id,
                payment_id,
                transaction_id,
                amount,
                now,
            } => Self::record_payment(
                state,
                RecordPayment {
                    booking_id,
                    payment_id,
                    transaction_id,
                    amount,
                    now,
                },
            ),

            LedgerAction::FailPayment {
                booking_id,
                payment_id,
                reason,
                now,
            } => Self::fail_payment(state, booking_id, payment_id, reason, now),

            LedgerAction::CompleteRefund {
                booking_id,
                refund_id,
                actor,
                now,
            } => Self::complete_refund(state, booking_id, refund_id, actor, now),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::environment::BookingPolicy;
    use crate::offers::LongStayOffer;
    use chrono::{Duration, NaiveDate, TimeZone};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn stay(start: &str, end: &str) -> StayDates {
        StayDates::new(date(start), date(end)).unwrap()
    }

    fn apartment() -> Apartment {
        Apartment {
            id: ApartmentId::new(),
            available: true,
            nightly_price: Money::from_cents(12_000),
            max_guests: 4,
        }
    }

    fn hold(state: &mut LedgerState, user_id: UserId, dates: StayDates) -> Result<BookingId, BookingError> {
        let booking_id = BookingId::new();
        let apartment_id = state.apartment.as_ref().unwrap().id;
        LedgerReducer::new().reduce(
            state,
            LedgerAction::PlaceHold {
                booking_id,
                apartment_id,
                user_id,
                stay: dates,
                guests: 2,
                now: now(),
            },
            &LedgerEnvironment::default(),
        )?;
        Ok(booking_id)
    }

    #[test]
    fn test_place_hold_prices_and_holds() {
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let apartment_id = state.apartment.as_ref().unwrap().id;
        let booking_id = BookingId::new();

        let effects = LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::PlaceHold {
                    booking_id,
                    apartment_id,
                    user_id: UserId::new(),
                    stay: stay("2025-07-01", "2025-07-05"),
                    guests: 2,
                    now: now(),
                },
                &LedgerEnvironment::default(),
            )
            .unwrap();

        let booking = state.booking(&booking_id).unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.nights, 4);
        assert_eq!(booking.total_amount, Money::from_cents(48_000));
        assert_eq!(booking.expires_at, Some(now() + Duration::minutes(15)));
        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], LedgerEffect::InsertHold(_)));
        assert!(matches!(
            &effects[1],
            LedgerEffect::Record(activity) if activity.kind == ActivityKind::HoldPlaced
        ));
    }

    #[test]
    fn test_place_hold_applies_offer_and_policy() {
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let apartment_id = state.apartment.as_ref().unwrap().id;
        let booking_id = BookingId::new();
        let env = LedgerEnvironment::new(
            BookingPolicy::with_hold_minutes(30),
            Arc::new(LongStayOffer {
                min_nights: 7,
                percent: 10,
            }),
        );

        LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::PlaceHold {
                    booking_id,
                    apartment_id,
                    user_id: UserId::new(),
                    stay: stay("2025-07-01", "2025-07-08"),
                    guests: 1,
                    now: now(),
                },
                &env,
            )
            .unwrap();

        let booking = state.booking(&booking_id).unwrap();
        // 7 nights × 120.00 = 840.00, minus 10%
        assert_eq!(booking.total_amount, Money::from_cents(75_600));
        assert_eq!(booking.expires_at, Some(now() + Duration::minutes(30)));
    }

    #[test]
    fn test_place_hold_rejections_leave_state_untouched() {
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let first = hold(&mut state, UserId::new(), stay("2025-07-01", "2025-07-05")).unwrap();
        let snapshot = state.clone();

        let err = hold(&mut state, UserId::new(), stay("2025-07-03", "2025-07-06")).unwrap_err();
        match err {
            BookingError::Conflict { conflicts } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].booking_id, first);
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let err = hold(&mut state, UserId::new(), stay("2025-06-01", "2025-06-03")).unwrap_err();
        assert!(matches!(err, BookingError::InvalidRange(_)));

        assert_eq!(state, snapshot);
    }

    #[test]
    fn test_place_hold_requires_listed_apartment() {
        let mut unlisted = apartment();
        unlisted.available = false;
        let mut state = LedgerState::for_apartment(Some(unlisted), vec![]);

        let err = hold(&mut state, UserId::new(), stay("2025-07-01", "2025-07-05")).unwrap_err();
        assert!(matches!(err, BookingError::NotFound { resource: "apartment", .. }));
    }

    #[test]
    fn test_place_hold_guest_limits() {
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let apartment_id = state.apartment.as_ref().unwrap().id;

        for guests in [0, 5] {
            let err = LedgerReducer::new()
                .reduce(
                    &mut state,
                    LedgerAction::PlaceHold {
                        booking_id: BookingId::new(),
                        apartment_id,
                        user_id: UserId::new(),
                        stay: stay("2025-07-01", "2025-07-05"),
                        guests,
                        now: now(),
                    },
                    &LedgerEnvironment::default(),
                )
                .unwrap_err();
            assert!(matches!(err, BookingError::Validation(_)));
        }
    }

    #[test]
    fn test_confirm_is_idempotent() {
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let booking_id = hold(&mut state, UserId::new(), stay("2025-07-01", "2025-07-05")).unwrap();
        let env = LedgerEnvironment::default();

        let effects = LedgerReducer::new()
            .reduce(&mut state, LedgerAction::Confirm { booking_id, now: now() }, &env)
            .unwrap();
        assert_eq!(effects.len(), 2);
        let booking = state.booking(&booking_id).unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.expires_at, None);

        let effects = LedgerReducer::new()
            .reduce(&mut state, LedgerAction::Confirm { booking_id, now: now() }, &env)
            .unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn test_confirm_lapsed_hold_resurrects_only_when_free() {
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let lapsed = hold(&mut state, UserId::new(), stay("2025-07-01", "2025-07-05")).unwrap();
        let later = now() + Duration::hours(1);
        let env = LedgerEnvironment::default();

        // Free: the lapsed hold comes back as confirmed
        let mut free = state.clone();
        LedgerReducer::new()
            .reduce(&mut free, LedgerAction::Confirm { booking_id: lapsed, now: later }, &env)
            .unwrap();
        assert_eq!(free.booking(&lapsed).unwrap().status, BookingStatus::Confirmed);

        // Taken: someone else holds overlapping dates now
        let mut rival = state.booking(&lapsed).unwrap().clone();
        rival.id = BookingId::new();
        rival.stay = stay("2025-07-04", "2025-07-06");
        rival.expires_at = Some(later + Duration::minutes(10));
        state.insert_booking(rival);

        let err = LedgerReducer::new()
            .reduce(&mut state, LedgerAction::Confirm { booking_id: lapsed, now: later }, &env)
            .unwrap_err();
        assert_eq!(err, BookingError::Expired { booking_id: lapsed });
    }

    #[test]
    fn test_cancel_guards() {
        let owner = UserId::new();
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let booking_id = hold(&mut state, owner, stay("2025-07-01", "2025-07-05")).unwrap();
        let env = LedgerEnvironment::default();

        let err = LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::Cancel {
                    booking_id,
                    actor: AuthContext::guest(UserId::new()),
                    now: now(),
                },
                &env,
            )
            .unwrap_err();
        assert!(matches!(err, BookingError::Forbidden(_)));

        LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::Cancel {
                    booking_id,
                    actor: AuthContext::guest(owner),
                    now: now(),
                },
                &env,
            )
            .unwrap();
        assert_eq!(state.booking(&booking_id).unwrap().status, BookingStatus::Cancelled);

        let err = LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::Cancel {
                    booking_id,
                    actor: AuthContext::admin(UserId::new()),
                    now: now(),
                },
                &env,
            )
            .unwrap_err();
        assert_eq!(
            err,
            BookingError::AlreadyTerminal {
                booking_id,
                status: BookingStatus::Cancelled
            }
        );
    }

    #[test]
    fn test_cancel_lapsed_hold_is_terminal() {
        let owner = UserId::new();
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let booking_id = hold(&mut state, owner, stay("2025-07-01", "2025-07-05")).unwrap();

        let err = LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::Cancel {
                    booking_id,
                    actor: AuthContext::guest(owner),
                    now: now() + Duration::days(1),
                },
                &LedgerEnvironment::default(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            BookingError::AlreadyTerminal {
                booking_id,
                status: BookingStatus::Expired
            }
        );
    }

    #[test]
    fn test_payment_flow_confirms_then_refunds_on_cancel() {
        let owner = UserId::new();
        let admin = AuthContext::admin(UserId::new());
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let booking_id = hold(&mut state, owner, stay("2025-07-01", "2025-07-05")).unwrap();
        let env = LedgerEnvironment::default();
        let total = state.booking(&booking_id).unwrap().total_amount;

        let effects = LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::RecordPayment {
                    booking_id,
                    payment_id: PaymentId::new(),
                    transaction_id: "txn_1".to_string(),
                    amount: total,
                    now: now(),
                },
                &env,
            )
            .unwrap();
        assert_eq!(effects.len(), 3);
        assert_eq!(state.booking(&booking_id).unwrap().status, BookingStatus::Confirmed);
        assert_eq!(state.payment(&booking_id).unwrap().status, PaymentStatus::Paid);

        LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::Cancel {
                    booking_id,
                    actor: AuthContext::guest(owner),
                    now: now(),
                },
                &env,
            )
            .unwrap();
        assert_eq!(
            state.payment(&booking_id).unwrap().status,
            PaymentStatus::RefundPending
        );

        let err = LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::CompleteRefund {
                    booking_id,
                    refund_id: "re_1".to_string(),
                    actor: AuthContext::guest(owner),
                    now: now(),
                },
                &env,
            )
            .unwrap_err();
        assert!(matches!(err, BookingError::Forbidden(_)));

        LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::CompleteRefund {
                    booking_id,
                    refund_id: "re_1".to_string(),
                    actor: admin,
                    now: now(),
                },
                &env,
            )
            .unwrap();
        let payment = state.payment(&booking_id).unwrap();
        assert_eq!(payment.status, PaymentStatus::Refunded);
        assert_eq!(payment.refund_id.as_deref(), Some("re_1"));
        assert_eq!(payment.refund_time, Some(now()));
    }

    #[test]
    fn test_payment_amount_must_match() {
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let booking_id = hold(&mut state, UserId::new(), stay("2025-07-01", "2025-07-05")).unwrap();

        let err = LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::RecordPayment {
                    booking_id,
                    payment_id: PaymentId::new(),
                    transaction_id: "txn_1".to_string(),
                    amount: Money::from_cents(1),
                    now: now(),
                },
                &LedgerEnvironment::default(),
            )
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
        assert!(state.payment(&booking_id).is_none());
    }

    #[test]
    fn test_late_payment_for_lost_hold_requests_refund() {
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let lapsed = hold(&mut state, UserId::new(), stay("2025-07-01", "2025-07-05")).unwrap();
        let later = now() + Duration::hours(1);
        let total = state.booking(&lapsed).unwrap().total_amount;

        let mut rival = state.booking(&lapsed).unwrap().clone();
        rival.id = BookingId::new();
        rival.status = BookingStatus::Confirmed;
        rival.expires_at = None;
        state.insert_booking(rival);

        let effects = LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::RecordPayment {
                    booking_id: lapsed,
                    payment_id: PaymentId::new(),
                    transaction_id: "txn_late".to_string(),
                    amount: total,
                    now: later,
                },
                &LedgerEnvironment::default(),
            )
            .unwrap();

        assert_eq!(state.booking(&lapsed).unwrap().status, BookingStatus::Pending);
        assert_eq!(
            state.payment(&lapsed).unwrap().status,
            PaymentStatus::RefundPending
        );
        assert!(effects.iter().any(|effect| matches!(
            effect,
            LedgerEffect::Record(activity) if activity.kind == ActivityKind::LatePayment
        )));
    }

    #[test]
    fn test_failed_payment_cannot_override_settled_payment() {
        let mut state = LedgerState::for_apartment(Some(apartment()), vec![]);
        let booking_id = hold(&mut state, UserId::new(), stay("2025-07-01", "2025-07-05")).unwrap();
        let total = state.booking(&booking_id).unwrap().total_amount;
        let env = LedgerEnvironment::default();

        LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::FailPayment {
                    booking_id,
                    payment_id: PaymentId::new(),
                    reason: "card declined".to_string(),
                    now: now(),
                },
                &env,
            )
            .unwrap();
        assert_eq!(state.payment(&booking_id).unwrap().status, PaymentStatus::Failed);
        assert_eq!(state.booking(&booking_id).unwrap().status, BookingStatus::Pending);

        LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::RecordPayment {
                    booking_id,
                    payment_id: PaymentId::new(),
                    transaction_id: "txn_retry".to_string(),
                    amount: total,
                    now: now(),
                },
                &env,
            )
            .unwrap();

        let err = LedgerReducer::new()
            .reduce(
                &mut state,
                LedgerAction::FailPayment {
                    booking_id,
                    payment_id: PaymentId::new(),
                    reason: "late decline".to_string(),
                    now: now(),
                },
                &env,
            )
            .unwrap_err();
        assert!(matches!(err, BookingError::InvalidPaymentState { .. }));
    }
}
