//! The booking lifecycle manager (imperative shell).
//!
//! Every operation follows the same shape:
//!
//! 1. read `now` once from the injected [`Clock`],
//! 2. enter the apartment's critical section when the calendar may change,
//! 3. load a [`LedgerState`] snapshot from the [`BookingStore`],
//! 4. run the [`LedgerReducer`],
//! 5. hand the effects to the store as one atomic [`Commit`].
//!
//! The in-process lock closes the check-then-insert race between requests
//! served by this manager; the store's guarded commit closes it between
//! processes. Commits that change an existing booking also carry the
//! booking and payment versions they were decided on. When another process
//! got there first the store answers [`StoreError::Stale`] (or
//! [`StoreError::Overlap`]) and the operation is decided again on a fresh
//! snapshot, up to [`MAX_ATTEMPTS`] times.

use crate::availability;
use crate::cache::ApartmentCache;
use crate::environment::{BookingPolicy, Clock, LedgerEnvironment};
use crate::error::{BookingError, StoreError};
use crate::ledger::{LedgerAction, LedgerReducer, LedgerState};
use crate::locks::ApartmentLocks;
use crate::offers::OfferEngine;
use crate::reducer::Reducer;
use crate::store::{BookingStore, Commit, Precondition};
use crate::types::{
    Activity, Apartment, ApartmentId, AuthContext, Availability, Booking, BookingId,
    BookingStatus, Money, Payment, PaymentId, PaymentStatus, StayDates,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Snapshots an operation on an existing booking is decided on before
/// giving up on a contended booking.
pub const MAX_ATTEMPTS: u32 = 4;

/// Request to hold an apartment's dates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRequest {
    /// Apartment to book
    pub apartment_id: ApartmentId,
    /// First night
    pub checkin: NaiveDate,
    /// Departure day (exclusive)
    pub checkout: NaiveDate,
    /// Number of guests
    pub guests: u32,
}

/// Result of a successful hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldReceipt {
    /// The new pending booking
    pub booking_id: BookingId,
    /// When the hold lapses unless paid
    pub expires_at: DateTime<Utc>,
    /// Price of the stay
    pub total_amount: Money,
    /// Number of nights
    pub nights: u32,
}

/// Gateway confirmation of a charge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotice {
    /// Booking the charge is for
    pub booking_id: BookingId,
    /// Gateway transaction ID
    pub transaction_id: String,
    /// Amount charged
    pub amount: Money,
}

/// Outcome of recording a payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    /// Booking after the payment was applied
    pub booking: Booking,
    /// The recorded payment
    pub payment: Payment,
    /// Whether the booking is now confirmed. When `false` the hold was lost
    /// and the payment is awaiting refund.
    pub confirmed: bool,
}

/// A booking with its payment and history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    /// The booking
    pub booking: Booking,
    /// Its payment, if any
    pub payment: Option<Payment>,
    /// Lifecycle activities, oldest first
    pub activities: Vec<Activity>,
}

/// Owns the reservation lifecycle.
pub struct BookingManager {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    env: LedgerEnvironment,
    cache: ApartmentCache,
    locks: ApartmentLocks,
    reducer: LedgerReducer,
}

impl BookingManager {
    /// Creates a manager with the default policy, no offers and the default
    /// apartment cache.
    #[must_use]
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            env: LedgerEnvironment::default(),
            cache: ApartmentCache::default(),
            locks: ApartmentLocks::new(),
            reducer: LedgerReducer::new(),
        }
    }

    /// Replaces the lifecycle policy
    #[must_use]
    pub fn with_policy(mut self, policy: BookingPolicy) -> Self {
        self.env.policy = policy;
        self
    }

    /// Replaces the offer engine
    #[must_use]
    pub fn with_offers(mut self, offers: Arc<dyn OfferEngine>) -> Self {
        self.env.offers = offers;
        self
    }

    /// Replaces the apartment cache
    #[must_use]
    pub fn with_cache(mut self, cache: ApartmentCache) -> Self {
        self.cache = cache;
        self
    }

    /// The active lifecycle policy
    #[must_use]
    pub const fn policy(&self) -> &BookingPolicy {
        &self.env.policy
    }

    /// The injected clock
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ========================================================================
    // Availability
    // ========================================================================

    /// Checks whether `[checkin, checkout)` is free at `apartment_id`.
    ///
    /// Pure read: stale holds are ignored, not swept.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidRange`] for a malformed or past range
    /// - [`BookingError::NotFound`] for an unknown or unlisted apartment
    /// - [`BookingError::Store`] if storage fails
    #[tracing::instrument(skip(self))]
    pub async fn check_availability(
        &self,
        apartment_id: ApartmentId,
        checkin: NaiveDate,
        checkout: NaiveDate,
    ) -> Result<Availability, BookingError> {
        let now = self.clock.now();
        let stay = availability::validate_request(checkin, checkout, now.date_naive())?;

        self.listed_apartment(apartment_id, now).await?;
        let bookings = self.store.bookings_overlapping(apartment_id, stay).await?;

        let result = availability::check(&stay, &bookings, now);
        tracing::debug!(
            available = result.available,
            conflicts = result.conflicts.len(),
            "Availability checked"
        );
        Ok(result)
    }

    // ========================================================================
    // Holds
    // ========================================================================

    /// Places a temporary hold on the requested dates for `actor`.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Conflict`] if a live booking overlaps the dates
    /// - [`BookingError::NotFound`] for an unknown or unlisted apartment
    /// - [`BookingError::InvalidRange`] / [`BookingError::Validation`] for bad input
    /// - [`BookingError::Store`] if storage fails
    #[tracing::instrument(
        skip(self, request, actor),
        fields(apartment_id = %request.apartment_id, user_id = %actor.user_id)
    )]
    pub async fn create_temp_booking(
        &self,
        request: HoldRequest,
        actor: &AuthContext,
    ) -> Result<HoldReceipt, BookingError> {
        let now = self.clock.now();
        let stay = StayDates::new(request.checkin, request.checkout)?;
        let apartment_id = request.apartment_id;
        let apartment = self.apartment(apartment_id, now).await?;

        let _guard = self.locks.acquire(apartment_id).await;

        let existing = self.store.bookings_overlapping(apartment_id, stay).await?;
        let mut state = LedgerState::for_apartment(apartment, existing);
        let booking_id = BookingId::new();

        let effects = self
            .reducer
            .reduce(
                &mut state,
                LedgerAction::PlaceHold {
                    booking_id,
                    apartment_id,
                    user_id: actor.user_id,
                    stay,
                    guests: request.guests,
                    now,
                },
                &self.env,
            )
            .inspect_err(|error| {
                if matches!(error, BookingError::Conflict { .. }) {
                    metrics::counter!("staybook_booking_conflicts_total").increment(1);
                }
            })?;

        match self
            .store
            .commit(Commit::from_effects(now, Some(apartment_id), effects))
            .await
        {
            Ok(()) => {}
            Err(StoreError::Overlap { .. }) => {
                metrics::counter!("staybook_booking_conflicts_total").increment(1);
                tracing::warn!("Hold rejected by storage overlap guard");
                let current = self.store.bookings_overlapping(apartment_id, stay).await?;
                let conflicts = availability::find_conflicts(&stay, &current, now, None);
                return Err(BookingError::Conflict { conflicts });
            }
            Err(other) => return Err(other.into()),
        }

        let booking = state
            .booking(&booking_id)
            .ok_or_else(|| BookingError::not_found("booking", booking_id))?;
        let expires_at = booking
            .expires_at
            .ok_or_else(|| StoreError::Corrupt(format!("hold {booking_id} has no expiry")))?;

        metrics::counter!("staybook_holds_created_total").increment(1);
        tracing::info!(%booking_id, %expires_at, total = %booking.total_amount, "Hold placed");

        Ok(HoldReceipt {
            booking_id,
            expires_at,
            total_amount: booking.total_amount,
            nights: booking.nights,
        })
    }

    // ========================================================================
    // Confirmation
    // ========================================================================

    /// Confirms a held booking.
    ///
    /// Confirming an already confirmed booking returns it unchanged. A lapsed
    /// hold is confirmed only if its dates are still free.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] for an unknown booking
    /// - [`BookingError::AlreadyTerminal`] for a cancelled booking
    /// - [`BookingError::Expired`] for a lapsed hold whose dates were taken
    /// - [`BookingError::Store`] if storage fails
    #[tracing::instrument(skip(self))]
    pub async fn confirm_booking(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        let now = self.clock.now();
        let apartment_id = self.booking_apartment(booking_id).await?;
        let _guard = self.locks.acquire(apartment_id).await;

        let state = match self
            .settle(booking_id, apartment_id, now, || LedgerAction::Confirm {
                booking_id,
                now,
            })
            .await
        {
            Ok(state) => state,
            Err(BookingError::Store(StoreError::Overlap { .. })) => {
                tracing::warn!("Lapsed hold lost its dates to another booking");
                return Err(BookingError::Expired { booking_id });
            }
            Err(other) => return Err(other),
        };

        tracing::info!("Booking confirmed");
        Self::booking_in(&state, booking_id)
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Cancels a booking on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] for an unknown booking
    /// - [`BookingError::Forbidden`] if `actor` is neither owner nor admin
    /// - [`BookingError::AlreadyTerminal`] for a cancelled or expired booking
    /// - [`BookingError::TooLate`] for a confirmed stay starting today or earlier
    /// - [`BookingError::Store`] if storage fails
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        actor: &AuthContext,
    ) -> Result<Booking, BookingError> {
        let now = self.clock.now();
        let apartment_id = self.booking_apartment(booking_id).await?;
        let _guard = self.locks.acquire(apartment_id).await;

        let actor = *actor;
        let state = self
            .settle(booking_id, apartment_id, now, || LedgerAction::Cancel {
                booking_id,
                actor,
                now,
            })
            .await?;

        let refund_pending = state
            .payment(&booking_id)
            .is_some_and(|payment| payment.status == PaymentStatus::RefundPending);
        metrics::counter!("staybook_bookings_cancelled_total").increment(1);
        tracing::info!(refund_pending, "Booking cancelled");

        Self::booking_in(&state, booking_id)
    }

    // ========================================================================
    // Payments
    // ========================================================================

    /// Records a successful charge and confirms the booking.
    ///
    /// If the hold was lost before the charge arrived, the payment is stored
    /// as awaiting refund and the receipt reports `confirmed: false`.
    /// Recording the same booking's payment twice is a no-op.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`] unless `actor` is an admin
    /// - [`BookingError::NotFound`] for an unknown booking
    /// - [`BookingError::Validation`] if the amount differs from the booking total
    /// - [`BookingError::Store`] if storage fails
    #[tracing::instrument(
        skip(self, notice, actor),
        fields(booking_id = %notice.booking_id, transaction_id = %notice.transaction_id)
    )]
    pub async fn record_payment(
        &self,
        notice: PaymentNotice,
        actor: &AuthContext,
    ) -> Result<PaymentReceipt, BookingError> {
        Self::require_admin(actor, "record payments")?;

        let now = self.clock.now();
        let booking_id = notice.booking_id;
        let apartment_id = self.booking_apartment(booking_id).await?;
        let _guard = self.locks.acquire(apartment_id).await;
        let payment_id = PaymentId::new();

        // Another process taking the dates shows up in the reloaded snapshot,
        // where the ledger takes the late-payment path instead.
        let state = self
            .settle(booking_id, apartment_id, now, || LedgerAction::RecordPayment {
                booking_id,
                payment_id,
                transaction_id: notice.transaction_id.clone(),
                amount: notice.amount,
                now,
            })
            .await
            .map_err(|error| match error {
                BookingError::Store(StoreError::Overlap { .. }) => {
                    BookingError::Store(StoreError::Stale { booking_id })
                }
                other => other,
            })?;

        let booking = Self::booking_in(&state, booking_id)?;
        let payment = state
            .payment(&booking_id)
            .cloned()
            .ok_or_else(|| BookingError::not_found("payment for booking", booking_id))?;
        let confirmed = booking.status == BookingStatus::Confirmed;

        if confirmed {
            tracing::info!("Payment recorded, booking confirmed");
        } else {
            tracing::warn!(payment_status = %payment.status, "Payment recorded for a lost hold");
        }

        Ok(PaymentReceipt {
            booking,
            payment,
            confirmed,
        })
    }

    /// Records a rejected charge. The booking is left alone and its hold
    /// lapses on its own.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`] unless `actor` is an admin
    /// - [`BookingError::NotFound`] for an unknown booking
    /// - [`BookingError::InvalidPaymentState`] if the payment already settled
    /// - [`BookingError::Store`] if storage fails
    #[tracing::instrument(skip(self, reason, actor))]
    pub async fn fail_payment(
        &self,
        booking_id: BookingId,
        reason: String,
        actor: &AuthContext,
    ) -> Result<Payment, BookingError> {
        Self::require_admin(actor, "record payments")?;

        let now = self.clock.now();
        let apartment_id = self.booking_apartment(booking_id).await?;
        let _guard = self.locks.acquire(apartment_id).await;

        let payment_id = PaymentId::new();
        let state = self
            .settle(booking_id, apartment_id, now, || LedgerAction::FailPayment {
                booking_id,
                payment_id,
                reason: reason.clone(),
                now,
            })
            .await?;

        tracing::info!("Payment failure recorded");
        state
            .payment(&booking_id)
            .cloned()
            .ok_or_else(|| BookingError::not_found("payment for booking", booking_id))
    }

    /// Marks a pending refund as processed.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`] unless `actor` is an admin
    /// - [`BookingError::NotFound`] for an unknown booking or missing payment
    /// - [`BookingError::InvalidPaymentState`] unless a refund is pending
    /// - [`BookingError::Store`] if storage fails
    #[tracing::instrument(skip(self, refund_id, actor))]
    pub async fn complete_refund(
        &self,
        booking_id: BookingId,
        refund_id: String,
        actor: &AuthContext,
    ) -> Result<Payment, BookingError> {
        let now = self.clock.now();
        let apartment_id = self.booking_apartment(booking_id).await?;
        let _guard = self.locks.acquire(apartment_id).await;

        let actor = *actor;
        let state = self
            .settle(booking_id, apartment_id, now, || LedgerAction::CompleteRefund {
                booking_id,
                refund_id: refund_id.clone(),
                actor,
                now,
            })
            .await?;

        tracing::info!("Refund completed");
        state
            .payment(&booking_id)
            .cloned()
            .ok_or_else(|| BookingError::not_found("payment for booking", booking_id))
    }

    // ========================================================================
    // Sweep & reads
    // ========================================================================

    /// Expires every lapsed hold. Returns the number of bookings changed.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`] if storage fails.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired_holds(&self) -> Result<u64, BookingError> {
        let now = self.clock.now();
        let expired = self.store.expire_stale_holds(now).await?;
        if expired > 0 {
            metrics::counter!("staybook_holds_expired_total").increment(expired);
            tracing::info!(expired, "Expired lapsed holds");
        }
        Ok(expired)
    }

    /// Bookings visible to `actor`, newest first. Sweeps first.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`] if storage fails.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn list_bookings(&self, actor: &AuthContext) -> Result<Vec<Booking>, BookingError> {
        self.sweep_expired_holds().await?;
        let owner = (!actor.is_admin()).then_some(actor.user_id);
        Ok(self.store.list_bookings(owner).await?)
    }

    /// A booking with its payment and activities. Sweeps first.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] for an unknown booking
    /// - [`BookingError::Forbidden`] if `actor` is neither owner nor admin
    /// - [`BookingError::Store`] if storage fails
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn get_booking(
        &self,
        booking_id: BookingId,
        actor: &AuthContext,
    ) -> Result<BookingDetails, BookingError> {
        self.sweep_expired_holds().await?;

        let booking = self
            .store
            .booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::not_found("booking", booking_id))?;
        if !actor.can_act_for(booking.user_id) {
            return Err(BookingError::Forbidden(format!(
                "booking {booking_id} belongs to another user"
            )));
        }

        let payment = self.store.payment_for_booking(booking_id).await?;
        let activities = self.store.activities(booking_id).await?;
        Ok(BookingDetails {
            booking,
            payment,
            activities,
        })
    }

    /// Creates or updates an apartment and drops it from the cache.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Forbidden`] unless `actor` is an admin
    /// - [`BookingError::Validation`] for a listing that cannot host anyone
    /// - [`BookingError::Store`] if storage fails
    #[tracing::instrument(skip(self, apartment, actor), fields(apartment_id = %apartment.id))]
    pub async fn put_apartment(
        &self,
        apartment: Apartment,
        actor: &AuthContext,
    ) -> Result<(), BookingError> {
        Self::require_admin(actor, "edit apartments")?;
        if apartment.max_guests == 0 {
            return Err(BookingError::Validation(
                "apartment must accept at least one guest".to_string(),
            ));
        }

        let apartment_id = apartment.id;
        self.store.put_apartment(apartment).await?;
        self.cache.invalidate(&apartment_id);
        tracing::info!("Apartment saved");
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn require_admin(actor: &AuthContext, what: &str) -> Result<(), BookingError> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(BookingError::Forbidden(format!("only admins can {what}")))
        }
    }

    async fn apartment(
        &self,
        apartment_id: ApartmentId,
        now: DateTime<Utc>,
    ) -> Result<Option<Apartment>, BookingError> {
        if let Some(apartment) = self.cache.get(&apartment_id, now) {
            return Ok(Some(apartment));
        }

        let apartment = self.store.apartment(apartment_id).await?;
        if let Some(apartment) = &apartment {
            self.cache.insert(apartment.clone(), now);
        }
        Ok(apartment)
    }

    async fn listed_apartment(
        &self,
        apartment_id: ApartmentId,
        now: DateTime<Utc>,
    ) -> Result<Apartment, BookingError> {
        self.apartment(apartment_id, now)
            .await?
            .filter(|apartment| apartment.available)
            .ok_or_else(|| BookingError::not_found("apartment", apartment_id))
    }

    async fn booking_apartment(&self, booking_id: BookingId) -> Result<ApartmentId, BookingError> {
        self.store
            .booking(booking_id)
            .await?
            .map(|booking| booking.apartment_id)
            .ok_or_else(|| BookingError::not_found("booking", booking_id))
    }

    async fn load_booking(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        self.store
            .booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::not_found("booking", booking_id))
    }

    /// The booking, its payment and every other booking competing for its
    /// dates.
    async fn snapshot(&self, booking_id: BookingId) -> Result<LedgerState, BookingError> {
        let booking = self.load_booking(booking_id).await?;
        let rivals = self
            .store
            .bookings_overlapping(booking.apartment_id, booking.stay)
            .await?;

        let mut state = LedgerState::for_apartment(None, rivals);
        state.insert_booking(booking);
        if let Some(payment) = self.store.payment_for_booking(booking_id).await? {
            state.insert_payment(payment);
        }
        Ok(state)
    }

    /// Decides `action` on a fresh snapshot of `booking_id` and commits its
    /// effects on condition that the booking and its payment are unchanged.
    ///
    /// A stale snapshot or a storage overlap is reloaded and decided again.
    /// After [`MAX_ATTEMPTS`] the last store error is returned.
    async fn settle(
        &self,
        booking_id: BookingId,
        apartment_id: ApartmentId,
        now: DateTime<Utc>,
        action: impl Fn() -> LedgerAction,
    ) -> Result<LedgerState, BookingError> {
        let mut attempt = 1;
        loop {
            let mut state = self.snapshot(booking_id).await?;
            let booking = Self::booking_in(&state, booking_id)?;
            let expected = [
                Precondition::booking(&booking),
                Precondition::payment(booking_id, state.payment(&booking_id)),
            ];

            let effects = self.reducer.reduce(&mut state, action(), &self.env)?;
            if effects.is_empty() {
                return Ok(state);
            }

            let commit = Commit::from_effects(now, Some(apartment_id), effects).expecting(expected);
            match self.store.commit(commit).await {
                Ok(()) => return Ok(state),
                Err(error @ (StoreError::Stale { .. } | StoreError::Overlap { .. }))
                    if attempt < MAX_ATTEMPTS =>
                {
                    tracing::warn!(attempt, %error, "Lost a storage race, deciding again");
                    attempt += 1;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    fn booking_in(state: &LedgerState, booking_id: BookingId) -> Result<Booking, BookingError> {
        state
            .booking(&booking_id)
            .cloned()
            .ok_or_else(|| BookingError::not_found("booking", booking_id))
    }
}

impl std::fmt::Debug for BookingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookingManager")
            .field("env", &self.env)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
