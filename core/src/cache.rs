//! Time-bounded apartment cache.
//!
//! Apartments are read on every availability check and hold, and change
//! rarely. Entries live for a fixed TTL measured against the caller's `now`
//! (so tests drive expiry through the injected clock) and are dropped
//! explicitly whenever the apartment is written.

use crate::types::{Apartment, ApartmentId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Default time an apartment stays cached.
pub const DEFAULT_TTL_SECS: i64 = 60;

/// Default number of cached apartments.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    apartment: Apartment,
    cached_at: DateTime<Utc>,
}

/// Apartment cache with TTL, capacity bound and invalidation.
#[derive(Debug)]
pub struct ApartmentCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<ApartmentId, Entry>>,
}

impl ApartmentCache {
    /// Creates a cache
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache that never holds anything
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Duration::zero(), 1)
    }

    /// Configured TTL
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached apartment, if present and fresh at `now`
    pub fn get(&self, id: &ApartmentId, now: DateTime<Utc>) -> Option<Apartment> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(id) {
            Some(entry) if now - entry.cached_at < self.ttl => Some(entry.apartment.clone()),
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    /// Caches `apartment` as read at `now`.
    ///
    /// When full, stale entries are dropped first, then the oldest one.
    pub fn insert(&self, apartment: Apartment, now: DateTime<Utc>) {
        if self.ttl <= Duration::zero() {
            return;
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= self.capacity && !entries.contains_key(&apartment.id) {
            let ttl = self.ttl;
            entries.retain(|_, entry| now - entry.cached_at < ttl);

            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.cached_at)
                    .map(|(id, _)| *id);
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            apartment.id,
            Entry {
                apartment,
                cached_at: now,
            },
        );
    }

    /// Drops a cached apartment
    pub fn invalidate(&self, id: &ApartmentId) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Number of entries, fresh or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ApartmentCache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TTL_SECS), DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Money;
    use chrono::TimeZone;

    fn apartment() -> Apartment {
        Apartment {
            id: ApartmentId::new(),
            available: true,
            nightly_price: Money::from_cents(9_000),
            max_guests: 2,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let cache = ApartmentCache::new(Duration::seconds(60), 8);
        let apartment = apartment();
        cache.insert(apartment.clone(), t0());

        assert_eq!(cache.get(&apartment.id, t0() + Duration::seconds(59)), Some(apartment.clone()));
        assert_eq!(cache.get(&apartment.id, t0() + Duration::seconds(60)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_drops_entry() {
        let cache = ApartmentCache::default();
        let apartment = apartment();
        cache.insert(apartment.clone(), t0());

        cache.invalidate(&apartment.id);
        assert_eq!(cache.get(&apartment.id, t0()), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = ApartmentCache::new(Duration::seconds(60), 2);
        let first = apartment();
        let second = apartment();
        let third = apartment();

        cache.insert(first.clone(), t0());
        cache.insert(second.clone(), t0() + Duration::seconds(1));
        cache.insert(third.clone(), t0() + Duration::seconds(2));

        let now = t0() + Duration::seconds(3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&first.id, now), None);
        assert!(cache.get(&second.id, now).is_some());
        assert!(cache.get(&third.id, now).is_some());
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = ApartmentCache::disabled();
        cache.insert(apartment(), t0());
        assert!(cache.is_empty());
    }
}
