//! Injected dependencies for the booking lifecycle.
//!
//! All external influences on the lifecycle (the current time, hold length,
//! pricing offers) are abstracted here and injected, so that the reducer stays
//! deterministic and tests control time explicitly.

use crate::offers::{NoOffers, OfferEngine};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// let clock: Arc<dyn Clock> = Arc::new(SystemClock);
///
/// // Test - fixed time for deterministic tests
/// let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(time));
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Default length of a payment hold.
pub const DEFAULT_HOLD_MINUTES: i64 = 15;

/// Tunable lifecycle rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    /// How long a pending booking holds its dates
    pub hold_duration: Duration,
}

impl BookingPolicy {
    /// Policy with a hold of the given number of minutes.
    #[must_use]
    pub fn with_hold_minutes(minutes: i64) -> Self {
        Self {
            hold_duration: Duration::minutes(minutes),
        }
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self::with_hold_minutes(DEFAULT_HOLD_MINUTES)
    }
}

/// Environment of the [`crate::ledger::LedgerReducer`].
#[derive(Clone)]
pub struct LedgerEnvironment {
    /// Lifecycle rules
    pub policy: BookingPolicy,
    /// Discounts applied to new holds
    pub offers: Arc<dyn OfferEngine>,
}

impl LedgerEnvironment {
    /// Creates a new `LedgerEnvironment`
    #[must_use]
    pub fn new(policy: BookingPolicy, offers: Arc<dyn OfferEngine>) -> Self {
        Self { policy, offers }
    }
}

impl Default for LedgerEnvironment {
    fn default() -> Self {
        Self::new(BookingPolicy::default(), Arc::new(NoOffers))
    }
}

impl std::fmt::Debug for LedgerEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEnvironment")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
