//! # Staybook Testing
//!
//! Testing utilities for the booking lifecycle.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`InMemoryBookingStore`], a `BookingStore` with the same commit
//!   guarantees as the Postgres store
//! - Fixtures and proptest strategies for domain types
//! - [`ReducerTest`], a given/when/then harness for reducers
//!
//! ## Example
//!
//! ```ignore
//! use staybook_testing::{fixtures, InMemoryBookingStore, ManualClock};
//!
//! #[tokio::test]
//! async fn hold_lapses() {
//!     let clock = ManualClock::new(fixtures::base_time());
//!     let store = InMemoryBookingStore::with_apartment(fixtures::apartment());
//!     let manager = BookingManager::new(Arc::new(store), Arc::new(clock.clone()));
//!
//!     let hold = manager.create_temp_booking(request, &guest).await?;
//!     clock.advance(chrono::Duration::minutes(16));
//!     assert_eq!(manager.sweep_expired_holds().await?, 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use staybook_core::environment::Clock;

pub mod in_memory;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use staybook_testing::mocks::FixedClock;
    /// use staybook_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it.
    ///
    /// Clones share the same time, so a test can keep a handle while the
    /// manager owns another.
    ///
    /// ```
    /// use staybook_testing::mocks::ManualClock;
    /// use staybook_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = ManualClock::new(Utc::now());
    /// let start = clock.now();
    /// clock.advance(Duration::minutes(15));
    /// assert_eq!(clock.now() - start, Duration::minutes(15));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (see [`crate::fixtures::base_time`])
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(crate::fixtures::base_time())
    }
}

/// Test data for the booking domain.
pub mod fixtures {
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use staybook_core::{
        Apartment, ApartmentId, AuthContext, Booking, BookingId, BookingStatus, Money,
        StayDates, UserId,
    };

    /// 2025-06-01 09:00:00 UTC. Every fixture date lies after this.
    ///
    /// # Panics
    ///
    /// Never: the timestamp is a valid constant.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0)
            .single()
            .expect("hardcoded timestamp is unambiguous")
    }

    /// Parses a `YYYY-MM-DD` date.
    ///
    /// # Panics
    ///
    /// Panics on a malformed date.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn date(s: &str) -> NaiveDate {
        s.parse().expect("fixture date must be YYYY-MM-DD")
    }

    /// `[start, end)` from two `YYYY-MM-DD` dates.
    ///
    /// # Panics
    ///
    /// Panics unless `end` is after `start`.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn stay(start: &str, end: &str) -> StayDates {
        StayDates::new(date(start), date(end)).expect("fixture stay must be non-empty")
    }

    /// Listed apartment for four guests at 100.00 a night.
    #[must_use]
    pub fn apartment() -> Apartment {
        Apartment {
            id: ApartmentId::new(),
            available: true,
            nightly_price: Money::from_cents(10_000),
            max_guests: 4,
        }
    }

    /// A fresh guest identity
    #[must_use]
    pub fn guest() -> AuthContext {
        AuthContext::guest(UserId::new())
    }

    /// A fresh admin identity
    #[must_use]
    pub fn admin() -> AuthContext {
        AuthContext::admin(UserId::new())
    }

    /// Booking of `apartment` for `stay`, created at [`base_time`].
    ///
    /// Pending bookings get a hold ending 15 minutes after [`base_time`].
    #[must_use]
    pub fn booking(apartment: &Apartment, stay: StayDates, status: BookingStatus) -> Booking {
        let now = base_time();
        let nights = stay.nights();
        Booking {
            id: BookingId::new(),
            apartment_id: apartment.id,
            user_id: UserId::new(),
            stay,
            status,
            expires_at: (status == BookingStatus::Pending)
                .then(|| now + chrono::Duration::minutes(15)),
            total_amount: apartment
                .nightly_price
                .checked_multiply(nights)
                .unwrap_or_default(),
            nights,
            guests: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use crate::fixtures::date;
    use chrono::Duration;
    use proptest::prelude::*;
    use staybook_core::StayDates;

    /// Stays of 1–14 nights starting within 60 days of 2025-07-01.
    #[allow(clippy::expect_used)]
    pub fn stay_dates() -> impl Strategy<Value = StayDates> {
        (0i64..60, 1i64..15).prop_map(|(offset, nights)| {
            let start = date("2025-07-01") + Duration::days(offset);
            StayDates::new(start, start + Duration::days(nights))
                .expect("generated stay is non-empty")
        })
    }

    /// Between 2 and `max` stays, typically overlapping each other.
    pub fn competing_stays(max: usize) -> impl Strategy<Value = Vec<StayDates>> {
        proptest::collection::vec(stay_dates(), 2..=max.max(2))
    }
}

/// Installs a `tracing` subscriber for test output, once per process.
///
/// Honours `RUST_LOG`; silent by default.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use in_memory::{CommitGate, InMemoryBookingStore};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use reducer_test::ReducerTest;
