//! Discounts applied when pricing a new hold.
//!
//! The full offer catalogue lives outside the booking core; the lifecycle only
//! asks for the percentage to take off a stay's base price.

use crate::types::{Apartment, StayDates};

/// Source of discounts for new holds.
pub trait OfferEngine: Send + Sync {
    /// Percentage (0–100) to take off the base price of `stay` at `apartment`.
    fn discount_percent(&self, apartment: &Apartment, stay: &StayDates) -> u32;
}

/// No discounts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOffers;

impl OfferEngine for NoOffers {
    fn discount_percent(&self, _apartment: &Apartment, _stay: &StayDates) -> u32 {
        0
    }
}

/// Flat discount for stays of at least `min_nights` nights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongStayOffer {
    /// Minimum number of nights to qualify
    pub min_nights: u32,
    /// Discount percentage
    pub percent: u32,
}

impl OfferEngine for LongStayOffer {
    fn discount_percent(&self, _apartment: &Apartment, stay: &StayDates) -> u32 {
        if stay.nights() >= self.min_nights {
            self.percent.min(100)
        } else {
            0
        }
    }
}
