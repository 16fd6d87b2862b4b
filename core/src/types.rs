//! Domain types for the booking lifecycle.
//!
//! Identifiers, money, half-open stay ranges, and the apartment, booking,
//! payment and activity records the lifecycle reads and writes.

use crate::error::BookingError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an apartment
    ApartmentId
);
uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Unique identifier for a user (guest or admin)
    UserId
);
uuid_id!(
    /// Unique identifier for a payment
    PaymentId
);
uuid_id!(
    /// Unique identifier for an activity record
    ActivityId
);

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Applies a percentage discount with overflow checking.
    ///
    /// Returns `None` for discounts above 100%.
    #[must_use]
    pub const fn checked_apply_discount(self, percent: u32) -> Option<Self> {
        if percent > 100 {
            return None;
        }
        let discount = match self.0.checked_mul(percent as u64) {
            Some(product) => product / 100,
            None => return None,
        };
        Some(Self(self.0 - discount))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Stay dates
// ============================================================================

/// Half-open calendar range `[start_date, end_date)`.
///
/// `start_date` is the check-in day, `end_date` the check-out day. The
/// check-out day is free for the next guest, so back-to-back stays never
/// overlap. A `StayDates` always covers at least one night.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawStayDates")]
pub struct StayDates {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

#[derive(Deserialize)]
struct RawStayDates {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

impl TryFrom<RawStayDates> for StayDates {
    type Error = BookingError;

    fn try_from(raw: RawStayDates) -> Result<Self, Self::Error> {
        Self::new(raw.start_date, raw.end_date)
    }
}

impl StayDates {
    /// Creates a stay range.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidRange`] unless `end_date > start_date`.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Result<Self, BookingError> {
        if end_date <= start_date {
            return Err(BookingError::InvalidRange(format!(
                "check-out {end_date} must be after check-in {start_date}"
            )));
        }
        Ok(Self {
            start_date,
            end_date,
        })
    }

    /// Check-in day (inclusive)
    #[must_use]
    pub const fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    /// Check-out day (exclusive)
    #[must_use]
    pub const fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    /// Number of nights covered by the stay
    #[must_use]
    pub fn nights(&self) -> u32 {
        let days = (self.end_date - self.start_date).num_days();
        u32::try_from(days).unwrap_or(u32::MAX)
    }

    /// Half-open overlap test: `other.start < self.end && other.end > self.start`
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        other.start_date < self.end_date && other.end_date > self.start_date
    }
}

impl fmt::Display for StayDates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_date, self.end_date)
    }
}

// ============================================================================
// Apartment
// ============================================================================

/// Apartment as seen by the booking lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Apartment {
    /// Apartment ID
    pub id: ApartmentId,
    /// Whether the apartment is listed for booking
    pub available: bool,
    /// Price per night
    pub nightly_price: Money,
    /// Maximum number of guests
    pub max_guests: u32,
}

// ============================================================================
// Booking
// ============================================================================

/// Status of a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Dates held while payment is outstanding
    Pending,
    /// Paid and confirmed
    Confirmed,
    /// Cancelled by the guest or an admin
    Cancelled,
    /// Hold lapsed without payment
    Expired,
}

impl BookingStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Cancelled and expired bookings never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reservation of an apartment for a stay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking ID
    pub id: BookingId,
    /// Booked apartment
    pub apartment_id: ApartmentId,
    /// Guest who owns the booking
    pub user_id: UserId,
    /// Reserved nights
    #[serde(flatten)]
    pub stay: StayDates,
    /// Lifecycle status
    pub status: BookingStatus,
    /// End of the hold (only while pending)
    pub expires_at: Option<DateTime<Utc>>,
    /// Amount due for the stay
    pub total_amount: Money,
    /// Number of nights
    pub nights: u32,
    /// Number of guests
    pub guests: u32,
    /// When the booking was created
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// A pending booking whose hold is no longer in the future.
    ///
    /// Lapsed holds behave as expired whether or not the sweep has run.
    #[must_use]
    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Pending && self.expires_at.is_some_and(|at| at <= now)
    }

    /// Whether this booking keeps its dates away from other guests at `now`.
    #[must_use]
    pub fn blocks(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            BookingStatus::Confirmed => true,
            BookingStatus::Pending => !self.is_lapsed(now),
            BookingStatus::Cancelled | BookingStatus::Expired => false,
        }
    }

    /// Status with lazy expiry applied.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> BookingStatus {
        if self.is_lapsed(now) {
            BookingStatus::Expired
        } else {
            self.status
        }
    }

    /// Moves a lapsed hold to `expired`. Returns whether anything changed.
    pub fn expire_if_lapsed(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_lapsed(now) {
            return false;
        }
        self.status = BookingStatus::Expired;
        self.updated_at = now;
        true
    }
}

// ============================================================================
// Payment
// ============================================================================

/// Status of a payment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Awaiting gateway confirmation
    Pending,
    /// Gateway confirmed the charge
    Paid,
    /// Gateway rejected the charge
    Failed,
    /// Booking cancelled after payment; refund awaits an admin
    RefundPending,
    /// Refund processed
    Refunded,
}

impl PaymentStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::RefundPending => "refund_pending",
            Self::Refunded => "refunded",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "refund_pending" => Some(Self::RefundPending),
            "refunded" => Some(Self::Refunded),
            _ => None,
        }
    }

    /// Whether the gateway has already taken the guest's money.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::RefundPending | Self::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment attached to a booking (at most one per booking).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment ID
    pub id: PaymentId,
    /// Booking being paid for
    pub booking_id: BookingId,
    /// Payment status
    pub status: PaymentStatus,
    /// Amount charged
    pub amount: Money,
    /// Gateway transaction ID
    pub transaction_id: Option<String>,
    /// Gateway failure reason
    pub failure_reason: Option<String>,
    /// When the gateway confirmed the charge
    pub paid_at: Option<DateTime<Utc>>,
    /// Gateway refund ID
    pub refund_id: Option<String>,
    /// When the refund was processed
    pub refund_time: Option<DateTime<Utc>>,
    /// When the payment was recorded
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Activity
// ============================================================================

/// Kind of activity record emitted by a lifecycle transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A hold was placed
    HoldPlaced,
    /// Booking confirmed
    BookingConfirmed,
    /// Booking cancelled
    BookingCancelled,
    /// Paid booking cancelled, refund requested
    RefundRequested,
    /// Refund processed by an admin
    RefundCompleted,
    /// Payment arrived after the hold was lost
    LatePayment,
}

impl ActivityKind {
    /// Convert kind to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HoldPlaced => "hold_placed",
            Self::BookingConfirmed => "booking_confirmed",
            Self::BookingCancelled => "booking_cancelled",
            Self::RefundRequested => "refund_requested",
            Self::RefundCompleted => "refund_completed",
            Self::LatePayment => "late_payment",
        }
    }

    /// Parse kind from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hold_placed" => Some(Self::HoldPlaced),
            "booking_confirmed" => Some(Self::BookingConfirmed),
            "booking_cancelled" => Some(Self::BookingCancelled),
            "refund_requested" => Some(Self::RefundRequested),
            "refund_completed" => Some(Self::RefundCompleted),
            "late_payment" => Some(Self::LatePayment),
            _ => None,
        }
    }
}

/// Activity/notification record for a booking's owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity ID
    pub id: ActivityId,
    /// User the activity is addressed to
    pub user_id: UserId,
    /// Booking the activity concerns
    pub booking_id: BookingId,
    /// Kind of activity
    pub kind: ActivityKind,
    /// Human-readable message
    pub message: String,
    /// When it happened
    pub created_at: DateTime<Utc>,
}

impl Activity {
    /// Creates an activity record for a booking's owner.
    #[must_use]
    pub fn for_booking(
        booking: &Booking,
        kind: ActivityKind,
        message: String,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ActivityId::new(),
            user_id: booking.user_id,
            booking_id: booking.id,
            kind,
            message,
            created_at: at,
        }
    }
}

// ============================================================================
// Authorization
// ============================================================================

/// Role of an authenticated identity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular guest
    Guest,
    /// Back-office administrator
    Admin,
}

/// Authenticated identity acting on the booking lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Authenticated user
    pub user_id: UserId,
    /// Role of the user
    pub role: Role,
}

impl AuthContext {
    /// Guest identity
    #[must_use]
    pub const fn guest(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Guest,
        }
    }

    /// Admin identity
    #[must_use]
    pub const fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    /// Whether this identity has admin rights
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Admins act for everyone, guests only for themselves.
    #[must_use]
    pub fn can_act_for(&self, owner: UserId) -> bool {
        self.is_admin() || self.user_id == owner
    }
}

// ============================================================================
// Availability
// ============================================================================

/// A live reservation blocking a requested range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// Blocking booking
    pub booking_id: BookingId,
    /// Its reserved nights
    #[serde(flatten)]
    pub stay: StayDates,
}

/// Result of an availability check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Whether the range can be booked
    pub available: bool,
    /// Reservations blocking the range, if any
    pub conflicts: Vec<Conflict>,
}

impl Availability {
    /// Builds the result from the blocking reservations found.
    #[must_use]
    pub fn from_conflicts(conflicts: Vec<Conflict>) -> Self {
        Self {
            available: conflicts.is_empty(),
            conflicts,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn stay(start: &str, end: &str) -> StayDates {
        StayDates::new(date(start), date(end)).unwrap()
    }

    #[test]
    fn test_stay_requires_at_least_one_night() {
        assert!(StayDates::new(date("2025-06-10"), date("2025-06-10")).is_err());
        assert!(StayDates::new(date("2025-06-10"), date("2025-06-09")).is_err());
        assert_eq!(stay("2025-06-10", "2025-06-15").nights(), 5);
    }

    #[test]
    fn test_back_to_back_stays_do_not_overlap() {
        let existing = stay("2025-06-10", "2025-06-15");
        assert!(!existing.overlaps(&stay("2025-06-05", "2025-06-10")));
        assert!(!existing.overlaps(&stay("2025-06-15", "2025-06-20")));
        assert!(existing.overlaps(&stay("2025-06-14", "2025-06-20")));
        assert!(existing.overlaps(&stay("2025-06-11", "2025-06-12")));
        assert!(existing.overlaps(&stay("2025-06-01", "2025-06-30")));
    }

    #[test]
    fn test_stay_deserialization_rejects_inverted_range() {
        let ok: Result<StayDates, _> =
            serde_json::from_str(r#"{"start_date":"2025-06-10","end_date":"2025-06-12"}"#);
        assert_eq!(ok.unwrap().nights(), 2);

        let bad: Result<StayDates, _> =
            serde_json::from_str(r#"{"start_date":"2025-06-12","end_date":"2025-06-10"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_money_discount() {
        let amount = Money::from_cents(10_000);
        assert_eq!(amount.checked_apply_discount(10), Some(Money::from_cents(9_000)));
        assert_eq!(amount.checked_apply_discount(0), Some(amount));
        assert_eq!(amount.checked_apply_discount(101), None);
        assert_eq!(amount.to_string(), "100.00");
    }

    #[test]
    fn test_pending_hold_lapses_at_expiry() {
        let now = Utc::now();
        let mut booking = Booking {
            id: BookingId::new(),
            apartment_id: ApartmentId::new(),
            user_id: UserId::new(),
            stay: stay("2025-06-10", "2025-06-15"),
            status: BookingStatus::Pending,
            expires_at: Some(now + Duration::minutes(15)),
            total_amount: Money::from_cents(50_000),
            nights: 5,
            guests: 2,
            created_at: now,
            updated_at: now,
        };

        assert!(booking.blocks(now));
        assert!(!booking.expire_if_lapsed(now));

        let later = now + Duration::minutes(15);
        assert!(!booking.blocks(later));
        assert_eq!(booking.effective_status(later), BookingStatus::Expired);
        assert!(booking.expire_if_lapsed(later));
        assert_eq!(booking.status, BookingStatus::Expired);
        assert!(!booking.expire_if_lapsed(later));
    }

    #[test]
    fn test_status_round_trips_through_database_strings() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Cancelled,
            BookingStatus::Expired,
        ] {
            assert_eq!(BookingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::parse("refund_pending"), Some(PaymentStatus::RefundPending));
        assert_eq!(PaymentStatus::parse("bogus"), None);
    }

    #[test]
    fn test_auth_context_ownership() {
        let owner = UserId::new();
        assert!(AuthContext::guest(owner).can_act_for(owner));
        assert!(!AuthContext::guest(UserId::new()).can_act_for(owner));
        assert!(AuthContext::admin(UserId::new()).can_act_for(owner));
    }
}
