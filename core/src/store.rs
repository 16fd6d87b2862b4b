//! Persistence abstraction for the booking lifecycle.
//!
//! The [`BookingStore`] trait is deliberately small: a handful of reads that
//! feed the [`crate::ledger::LedgerReducer`], one atomic [`Commit`] that
//! applies its effects, and the expiry sweep.
//!
//! # Implementations
//!
//! - `PostgresBookingStore` (in `staybook-postgres`): production implementation
//!   with an advisory lock per apartment and an exclusion constraint.
//! - `InMemoryBookingStore` (in `staybook-testing`): fast, deterministic testing.
//!
//! # Atomicity
//!
//! [`BookingStore::commit`] must apply every write of a [`Commit`] or none of
//! them. When the commit carries a `guard` apartment, the store must, in the
//! same transaction and before any booking write:
//!
//! 1. serialise against other guarded commits for that apartment,
//! 2. expire the apartment's pending holds with `expires_at <= now`,
//!
//! and it must reject the commit with [`StoreError::Overlap`] if its writes
//! would leave two `pending`/`confirmed` bookings of one apartment with
//! overlapping dates.
//!
//! Every [`Precondition`] of a commit is checked before anything is written,
//! and before the guarded sweep. A row that no longer matches fails the
//! commit with [`StoreError::Stale`].

use crate::error::StoreError;
use crate::ledger::LedgerEffect;
use crate::types::{
    Activity, Apartment, ApartmentId, Booking, BookingId, BookingStatus, Payment, PaymentStatus,
    StayDates, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`BookingStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Row state a decision was made on.
///
/// Status plus `updated_at` serve as the row version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Precondition {
    /// The booking still has this status and update time.
    Booking {
        /// Booking ID
        id: BookingId,
        /// Status that was read
        status: BookingStatus,
        /// Update time that was read
        updated_at: DateTime<Utc>,
    },
    /// The booking's payment is still as read; `current` is `None` when no
    /// payment existed.
    Payment {
        /// Booking the payment belongs to
        booking_id: BookingId,
        /// Status and update time that were read
        current: Option<(PaymentStatus, DateTime<Utc>)>,
    },
}

impl Precondition {
    /// Expect `booking` to be unchanged
    #[must_use]
    pub const fn booking(booking: &Booking) -> Self {
        Self::Booking {
            id: booking.id,
            status: booking.status,
            updated_at: booking.updated_at,
        }
    }

    /// Expect the payment of `booking_id` to be unchanged, or still absent
    #[must_use]
    pub fn payment(booking_id: BookingId, payment: Option<&Payment>) -> Self {
        Self::Payment {
            booking_id,
            current: payment.map(|payment| (payment.status, payment.updated_at)),
        }
    }

    /// Booking the precondition is about
    #[must_use]
    pub const fn booking_id(&self) -> BookingId {
        match self {
            Self::Booking { id, .. } => *id,
            Self::Payment { booking_id, .. } => *booking_id,
        }
    }

    /// Whether the stored booking still matches
    #[must_use]
    pub fn matches_booking(&self, stored: Option<&Booking>) -> bool {
        match self {
            Self::Booking {
                status, updated_at, ..
            } => stored.is_some_and(|booking| {
                booking.status == *status && booking.updated_at == *updated_at
            }),
            Self::Payment { .. } => true,
        }
    }

    /// Whether the stored payment still matches
    #[must_use]
    pub fn matches_payment(&self, stored: Option<&Payment>) -> bool {
        match self {
            Self::Payment { current, .. } => {
                stored.map(|payment| (payment.status, payment.updated_at)) == *current
            }
            Self::Booking { .. } => true,
        }
    }
}

/// A set of writes applied atomically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    /// Time of the operation, used for the guarded sweep
    pub now: DateTime<Utc>,
    /// Apartment whose calendar this commit changes
    pub guard: Option<ApartmentId>,
    /// New bookings
    pub inserts: Vec<Booking>,
    /// Bookings whose status changed
    pub updates: Vec<Booking>,
    /// Payments to insert or update
    pub payments: Vec<Payment>,
    /// Activities to append
    pub activities: Vec<Activity>,
    /// Rows that must be unchanged for the commit to apply
    pub expected: Vec<Precondition>,
}

impl Commit {
    /// Empty commit
    #[must_use]
    pub const fn new(now: DateTime<Utc>, guard: Option<ApartmentId>) -> Self {
        Self {
            now,
            guard,
            inserts: Vec::new(),
            updates: Vec::new(),
            payments: Vec::new(),
            activities: Vec::new(),
            expected: Vec::new(),
        }
    }

    /// Adds preconditions to the commit
    #[must_use]
    pub fn expecting(mut self, preconditions: impl IntoIterator<Item = Precondition>) -> Self {
        self.expected.extend(preconditions);
        self
    }

    /// Collects reducer effects into a commit.
    #[must_use]
    pub fn from_effects(
        now: DateTime<Utc>,
        guard: Option<ApartmentId>,
        effects: impl IntoIterator<Item = LedgerEffect>,
    ) -> Self {
        let mut commit = Self::new(now, guard);
        for effect in effects {
            match effect {
                LedgerEffect::InsertHold(booking) => commit.inserts.push(booking),
                LedgerEffect::UpdateBooking(booking) => commit.updates.push(booking),
                LedgerEffect::SavePayment(payment) => commit.payments.push(payment),
                LedgerEffect::Record(activity) => commit.activities.push(activity),
            }
        }
        commit
    }

    /// Whether the commit writes anything
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.payments.is_empty()
            && self.activities.is_empty()
    }

    /// Booking writes of this commit, inserts first
    pub fn bookings(&self) -> impl Iterator<Item = &Booking> {
        self.inserts.iter().chain(self.updates.iter())
    }
}

/// Storage for apartments, bookings, payments and activities.
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` so that it stays dyn-compatible: the manager holds an
/// `Arc<dyn BookingStore>`.
pub trait BookingStore: Send + Sync {
    /// Load an apartment
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn apartment(&self, id: ApartmentId) -> StoreFuture<'_, Option<Apartment>>;

    /// Insert or replace an apartment
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn put_apartment(&self, apartment: Apartment) -> StoreFuture<'_, ()>;

    /// Load a booking
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn booking(&self, id: BookingId) -> StoreFuture<'_, Option<Booking>>;

    /// Bookings of `apartment_id` with status `pending` or `confirmed` whose
    /// dates overlap `stay`. Liveness of pending holds is decided by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn bookings_overlapping(
        &self,
        apartment_id: ApartmentId,
        stay: StayDates,
    ) -> StoreFuture<'_, Vec<Booking>>;

    /// Bookings of one user, or all bookings when `user_id` is `None`, newest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn list_bookings(&self, user_id: Option<UserId>) -> StoreFuture<'_, Vec<Booking>>;

    /// Payment of a booking
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn payment_for_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Payment>>;

    /// Activities recorded for a booking, oldest first
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn activities(&self, booking_id: BookingId) -> StoreFuture<'_, Vec<Activity>>;

    /// Apply a commit atomically (see the module docs).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Stale`] if a precondition no longer holds,
    /// [`StoreError::Overlap`] if the writes would double-book the guarded
    /// apartment, or another [`StoreError`] if the transaction fails.
    /// Nothing is written in either case.
    fn commit(&self, commit: Commit) -> StoreFuture<'_, ()>;

    /// Expire every pending booking with `expires_at <= now`.
    ///
    /// Returns the number of bookings changed. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    fn expire_stale_holds(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{ActivityKind, BookingStatus, Money};
    use chrono::TimeZone;

    #[test]
    fn test_from_effects_sorts_writes() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let stay = StayDates::new(
            "2025-07-01".parse().unwrap(),
            "2025-07-03".parse().unwrap(),
        )
        .unwrap();
        let booking = Booking {
            id: BookingId::new(),
            apartment_id: ApartmentId::new(),
            user_id: UserId::new(),
            stay,
            status: BookingStatus::Pending,
            expires_at: Some(now),
            total_amount: Money::from_cents(100),
            nights: 2,
            guests: 1,
            created_at: now,
            updated_at: now,
        };
        let activity =
            Activity::for_booking(&booking, ActivityKind::HoldPlaced, "held".to_string(), now);

        let commit = Commit::from_effects(
            now,
            Some(booking.apartment_id),
            [
                LedgerEffect::InsertHold(booking.clone()),
                LedgerEffect::Record(activity),
            ],
        );

        assert_eq!(commit.inserts, vec![booking]);
        assert!(commit.updates.is_empty());
        assert_eq!(commit.activities.len(), 1);
        assert_eq!(commit.bookings().count(), 1);
        assert!(!commit.is_empty());
        assert!(Commit::new(now, None).is_empty());
    }

    #[test]
    fn test_preconditions_compare_status_and_update_time() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let booking = Booking {
            id: BookingId::new(),
            apartment_id: ApartmentId::new(),
            user_id: UserId::new(),
            stay: StayDates::new(
                "2025-07-01".parse().unwrap(),
                "2025-07-03".parse().unwrap(),
            )
            .unwrap(),
            status: BookingStatus::Pending,
            expires_at: Some(now),
            total_amount: Money::from_cents(100),
            nights: 2,
            guests: 1,
            created_at: now,
            updated_at: now,
        };
        let expected = Precondition::booking(&booking);
        assert!(expected.matches_booking(Some(&booking)));
        assert!(!expected.matches_booking(None));

        let mut confirmed = booking.clone();
        confirmed.status = BookingStatus::Confirmed;
        assert!(!expected.matches_booking(Some(&confirmed)));

        let no_payment = Precondition::payment(booking.id, None);
        assert!(no_payment.matches_payment(None));
        assert_eq!(no_payment.booking_id(), booking.id);

        let paid = Payment {
            id: crate::types::PaymentId::new(),
            booking_id: booking.id,
            status: PaymentStatus::Paid,
            amount: booking.total_amount,
            transaction_id: Some("txn".to_string()),
            failure_reason: None,
            paid_at: Some(now),
            refund_id: None,
            refund_time: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!no_payment.matches_payment(Some(&paid)));
        assert!(Precondition::payment(booking.id, Some(&paid)).matches_payment(Some(&paid)));

        let commit = Commit::new(now, None).expecting([expected, no_payment]);
        assert_eq!(commit.expected.len(), 2);
        assert!(commit.is_empty());
    }
}
