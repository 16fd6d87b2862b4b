//! HTTP request handlers.
//!
//! This module contains all HTTP handlers organized by resource.

pub mod admin;
pub mod availability;
pub mod bookings;
pub mod health;
pub mod payments;

pub use health::health_check;
