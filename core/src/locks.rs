//! Per-apartment critical sections.
//!
//! Holds on one apartment are serialised from availability read to commit;
//! different apartments proceed in parallel. The registry keeps only weak
//! references, so an apartment's mutex lives exactly as long as someone is
//! holding or waiting for it.

use crate::types::ApartmentId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard for an apartment's critical section.
pub type ApartmentGuard = OwnedMutexGuard<()>;

/// Registry of per-apartment async mutexes.
#[derive(Debug, Default)]
pub struct ApartmentLocks {
    locks: Mutex<HashMap<ApartmentId, Weak<AsyncMutex<()>>>>,
}

impl ApartmentLocks {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `apartment_id`.
    pub async fn acquire(&self, apartment_id: ApartmentId) -> ApartmentGuard {
        let mutex = self.mutex_for(apartment_id);
        mutex.lock_owned().await
    }

    fn mutex_for(&self, apartment_id: ApartmentId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = locks.get(&apartment_id).and_then(Weak::upgrade) {
            return existing;
        }

        locks.retain(|_, weak| weak.strong_count() > 0);
        let mutex = Arc::new(AsyncMutex::new(()));
        locks.insert(apartment_id, Arc::downgrade(&mutex));
        mutex
    }

    /// Number of apartments currently locked or awaited
    #[must_use]
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
