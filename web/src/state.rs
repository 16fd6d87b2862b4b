//! Application state for Axum handlers.

use crate::auth::IdentityVerifier;
use staybook_core::manager::BookingManager;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// # Examples
///
/// ```ignore
/// let state = AppState::new(
///     Arc::new(BookingManager::new(store, Arc::new(SystemClock))),
///     Arc::new(JwtVerifier::new(secret.as_bytes())),
/// );
/// let app = staybook_web::router(state);
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Booking lifecycle manager
    pub manager: Arc<BookingManager>,
    /// Bearer token verifier
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(manager: Arc<BookingManager>, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { manager, verifier }
    }
}
