//! Staybook booking service.
//!
//! Wires configuration, the Postgres booking store, the booking manager and
//! the HTTP router into a runnable service.

#![forbid(unsafe_code)]

pub mod config;
pub mod sweeper;

pub use config::{Config, ConfigError};

use staybook_core::cache::ApartmentCache;
use staybook_core::environment::{BookingPolicy, Clock};
use staybook_core::manager::BookingManager;
use staybook_core::store::BookingStore;
use std::sync::Arc;

/// Build a booking manager configured from `config`.
#[must_use]
pub fn build_manager(
    config: &Config,
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
) -> BookingManager {
    let cache = ApartmentCache::new(
        chrono::Duration::seconds(config.booking.cache_ttl_secs),
        config.booking.cache_capacity,
    );

    BookingManager::new(store, clock)
        .with_policy(BookingPolicy::with_hold_minutes(config.booking.hold_minutes))
        .with_cache(cache)
}

/// Register descriptions for the service's Prometheus metrics.
pub fn describe_metrics() {
    metrics::describe_counter!("staybook_holds_created_total", "Temporary holds placed");
    metrics::describe_counter!(
        "staybook_booking_conflicts_total",
        "Hold requests rejected because the dates were taken"
    );
    metrics::describe_counter!("staybook_holds_expired_total", "Lapsed holds moved to expired");
    metrics::describe_counter!("staybook_bookings_cancelled_total", "Bookings cancelled");
    metrics::describe_counter!(
        "staybook_store_overlap_rejections_total",
        "Writes rejected by the database overlap constraint"
    );
    metrics::describe_counter!("staybook_http_requests_total", "HTTP requests by method and status");
    metrics::describe_histogram!(
        "staybook_http_request_duration_seconds",
        "HTTP request latency by method and status"
    );
}
