//! In-memory booking store for fast, deterministic testing.
//!
//! [`InMemoryBookingStore`] mirrors the guarantees of the Postgres store:
//! commits are all-or-nothing, a guarded commit expires the apartment's
//! lapsed holds first, and no commit may leave two `pending`/`confirmed`
//! bookings of one apartment overlapping. Commits whose preconditions no
//! longer hold fail with [`StoreError::Stale`]. Clones share the same tables,
//! so two managers built on clones behave like two processes on one database.

#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use staybook_core::store::{BookingStore, Commit, Precondition, StoreFuture};
use staybook_core::{
    Activity, Apartment, ApartmentId, Booking, BookingId, BookingStatus, Payment, StayDates,
    StoreError, UserId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Default)]
struct Tables {
    apartments: HashMap<ApartmentId, Apartment>,
    bookings: HashMap<BookingId, Booking>,
    payments: HashMap<BookingId, Payment>,
    activities: Vec<Activity>,
}

/// Shared-table booking store.
///
/// # Example
///
/// ```
/// use staybook_testing::{fixtures, InMemoryBookingStore};
///
/// let apartment = fixtures::apartment();
/// let store = InMemoryBookingStore::with_apartment(apartment.clone());
/// assert_eq!(store.booking_count(), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryBookingStore {
    tables: Arc<RwLock<Tables>>,
    fail_commits: Arc<AtomicBool>,
    commits: Arc<AtomicUsize>,
    gate: Option<Arc<Gate>>,
}

#[derive(Debug)]
struct Gate {
    arrived: Notify,
    release: Semaphore,
}

/// Holds back the commits of a gated store handle (see
/// [`InMemoryBookingStore::gated`]).
#[derive(Clone, Debug)]
pub struct CommitGate(Arc<Gate>);

impl CommitGate {
    /// Waits until a commit is parked at the gate
    pub async fn arrived(&self) {
        self.0.arrived.notified().await;
    }

    /// Lets one parked commit through
    pub fn release(&self) {
        self.0.release.add_permits(1);
    }

    /// Lets every current and future commit through
    pub fn open(&self) {
        self.0.release.close();
    }
}

impl InMemoryBookingStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding one apartment
    #[must_use]
    pub fn with_apartment(apartment: Apartment) -> Self {
        let store = Self::new();
        store.insert_apartment(apartment);
        store
    }

    /// Seed an apartment directly
    pub fn insert_apartment(&self, apartment: Apartment) {
        self.write().apartments.insert(apartment.id, apartment);
    }

    /// Seed a booking directly, bypassing the overlap guard
    pub fn insert_booking(&self, booking: Booking) {
        self.write().bookings.insert(booking.id, booking);
    }

    /// Seed a payment directly
    pub fn insert_payment(&self, payment: Payment) {
        self.write().payments.insert(payment.booking_id, payment);
    }

    /// A handle on the same tables whose commits wait at a [`CommitGate`]
    /// after the caller has read its snapshot.
    ///
    /// Other handles are not affected.
    #[must_use]
    pub fn gated(&self) -> (Self, CommitGate) {
        let gate = Arc::new(Gate {
            arrived: Notify::new(),
            release: Semaphore::new(0),
        });
        let mut store = self.clone();
        store.gate = Some(Arc::clone(&gate));
        (store, CommitGate(gate))
    }

    /// Make every following commit fail with a database error
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of commits applied
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of stored bookings
    #[must_use]
    pub fn booking_count(&self) -> usize {
        self.read().bookings.len()
    }

    /// All bookings of an apartment, ordered by check-in
    #[must_use]
    pub fn bookings_of(&self, apartment_id: ApartmentId) -> Vec<Booking> {
        let mut bookings: Vec<Booking> = self
            .read()
            .bookings
            .values()
            .filter(|booking| booking.apartment_id == apartment_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|booking| booking.stay.start_date());
        bookings
    }

    /// Every stored activity, in insertion order
    #[must_use]
    pub fn all_activities(&self) -> Vec<Activity> {
        self.read().activities.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn claims_dates(booking: &Booking) -> bool {
        matches!(
            booking.status,
            BookingStatus::Pending | BookingStatus::Confirmed
        )
    }

    fn check(tables: &Tables, expected: &Precondition) -> Result<(), StoreError> {
        let booking_id = expected.booking_id();
        let current = expected.matches_booking(tables.bookings.get(&booking_id))
            && expected.matches_payment(tables.payments.get(&booking_id));
        if current {
            Ok(())
        } else {
            Err(StoreError::Stale { booking_id })
        }
    }

    fn apply(tables: &mut Tables, commit: Commit) -> Result<(), StoreError> {
        for expected in &commit.expected {
            Self::check(tables, expected)?;
        }

        let mut bookings = tables.bookings.clone();

        if let Some(apartment_id) = commit.guard {
            for booking in bookings
                .values_mut()
                .filter(|booking| booking.apartment_id == apartment_id)
            {
                booking.expire_if_lapsed(commit.now);
            }
        }

        for booking in commit.bookings() {
            bookings.insert(booking.id, booking.clone());
        }

        for written in commit.bookings().filter(|booking| Self::claims_dates(booking)) {
            let clash = bookings.values().any(|other| {
                other.id != written.id
                    && other.apartment_id == written.apartment_id
                    && Self::claims_dates(other)
                    && other.stay.overlaps(&written.stay)
            });
            if clash {
                return Err(StoreError::Overlap {
                    apartment_id: written.apartment_id,
                });
            }
        }

        tables.bookings = bookings;
        for payment in commit.payments {
            tables.payments.insert(payment.booking_id, payment);
        }
        tables.activities.extend(commit.activities);
        Ok(())
    }
}

impl BookingStore for InMemoryBookingStore {
    fn apartment(&self, id: ApartmentId) -> StoreFuture<'_, Option<Apartment>> {
        Box::pin(async move { Ok(self.read().apartments.get(&id).cloned()) })
    }

    fn put_apartment(&self, apartment: Apartment) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.insert_apartment(apartment);
            Ok(())
        })
    }

    fn booking(&self, id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move { Ok(self.read().bookings.get(&id).cloned()) })
    }

    fn bookings_overlapping(
        &self,
        apartment_id: ApartmentId,
        stay: StayDates,
    ) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let mut bookings: Vec<Booking> = self
                .read()
                .bookings
                .values()
                .filter(|booking| {
                    booking.apartment_id == apartment_id
                        && Self::claims_dates(booking)
                        && booking.stay.overlaps(&stay)
                })
                .cloned()
                .collect();
            bookings.sort_by_key(|booking| booking.stay.start_date());
            Ok(bookings)
        })
    }

    fn list_bookings(&self, user_id: Option<UserId>) -> StoreFuture<'_, Vec<Booking>> {
        Box::pin(async move {
            let mut bookings: Vec<Booking> = self
                .read()
                .bookings
                .values()
                .filter(|booking| user_id.is_none_or(|user_id| booking.user_id == user_id))
                .cloned()
                .collect();
            bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(bookings)
        })
    }

    fn payment_for_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Payment>> {
        Box::pin(async move { Ok(self.read().payments.get(&booking_id).cloned()) })
    }

    fn activities(&self, booking_id: BookingId) -> StoreFuture<'_, Vec<Activity>> {
        Box::pin(async move {
            Ok(self
                .read()
                .activities
                .iter()
                .filter(|activity| activity.booking_id == booking_id)
                .cloned()
                .collect())
        })
    }

    fn commit(&self, commit: Commit) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(StoreError::Database("injected commit failure".to_string()));
            }

            // Let racing tasks interleave between their reads and this commit.
            tokio::task::yield_now().await;

            if let Some(gate) = &self.gate {
                gate.arrived.notify_one();
                if let Ok(permit) = gate.release.acquire().await {
                    permit.forget();
                }
            }

            Self::apply(&mut self.write(), commit)?;
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn expire_stale_holds(&self, now: DateTime<Utc>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut tables = self.write();
            let expired = tables
                .bookings
                .values_mut()
                .map(|booking| booking.expire_if_lapsed(now))
                .filter(|changed| *changed)
                .count();
            tracing::debug!(expired, "In-memory sweep");
            Ok(u64::try_from(expired).unwrap_or(u64::MAX))
        })
    }
}
