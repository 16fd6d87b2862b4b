//! # Staybook Core
//!
//! Booking lifecycle management for furnished apartment rentals.
//!
//! This crate owns the one piece of the booking system with real invariants:
//! deciding whether a date range is free, holding it while the guest pays,
//! confirming, expiring and cancelling reservations, and never letting two
//! live reservations overlap on the same apartment.
//!
//! ## Architecture
//!
//! - **Functional core**: [`ledger::LedgerReducer`] is a pure
//!   `(State, Action, Environment) → Result<Effects>` function. It validates
//!   commands against a snapshot of one apartment's bookings and describes the
//!   writes to perform as [`ledger::LedgerEffect`] values.
//! - **Imperative shell**: [`manager::BookingManager`] loads the snapshot,
//!   serialises work per apartment ([`locks::ApartmentLocks`]), runs the
//!   reducer and hands the resulting [`store::Commit`] to a
//!   [`store::BookingStore`] that applies it atomically.
//! - **Environment**: time comes from an injected [`environment::Clock`],
//!   pricing adjustments from an [`offers::OfferEngine`].
//!
//! ## Example
//!
//! ```ignore
//! use staybook_core::manager::{BookingManager, HoldRequest};
//!
//! let manager = BookingManager::new(store, Arc::new(SystemClock));
//! let receipt = manager
//!     .create_temp_booking(
//!         HoldRequest { apartment_id, checkin, checkout, guests: 2 },
//!         &AuthContext::guest(user_id),
//!     )
//!     .await?;
//! println!("hold {} expires at {}", receipt.booking_id, receipt.expires_at);
//! ```

pub mod availability;
pub mod cache;
pub mod environment;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod manager;
pub mod offers;
pub mod reducer;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use error::{BookingError, StoreError};
pub use smallvec::{smallvec, SmallVec};
pub use types::{
    Activity, ActivityKind, Apartment, ApartmentId, AuthContext, Availability, Booking,
    BookingId, BookingStatus, Conflict, Money, Payment, PaymentId, PaymentStatus, Role,
    StayDates, UserId,
};
