//! HTTP surface for the Staybook booking lifecycle.
//!
//! Thin imperative shell over [`staybook_core::manager::BookingManager`]:
//! handlers parse requests, resolve the caller's identity from a bearer
//! token, call exactly one manager operation and map the outcome to JSON or
//! an [`AppError`].
//!
//! # Request Flow
//!
//! 1. **Correlation ID** attached by [`middleware::correlation_id_layer`]
//! 2. **Identity** verified by the [`extractors::Identity`] extractor
//! 3. **Manager call** performs the lifecycle operation
//! 4. **Map result** to HTTP response (`BookingError` → status + code)
//!
//! # Example
//!
//! ```ignore
//! let state = AppState::new(manager, Arc::new(JwtVerifier::new(secret)));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, staybook_web::router(state)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

// Re-export key types for convenience
pub use auth::{IdentityVerifier, JwtVerifier};
pub use error::AppError;
pub use extractors::{AdminIdentity, BearerToken, CorrelationId, Identity};
pub use middleware::{correlation_id_layer, CorrelationIdExt, CORRELATION_ID_HEADER};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/apartments/:id/availability",
            get(handlers::availability::check_availability),
        )
        .route(
            "/bookings",
            post(handlers::bookings::create_hold).get(handlers::bookings::list_bookings),
        )
        .route("/bookings/:id", get(handlers::bookings::get_booking))
        .route("/bookings/:id/cancel", post(handlers::bookings::cancel_booking))
        .route("/bookings/:id/confirm", post(handlers::bookings::confirm_booking))
        .route("/payments/confirm", post(handlers::payments::payment_confirmed))
        .route("/payments/fail", post(handlers::payments::payment_failed))
        .route("/admin/apartments/:id", put(handlers::admin::put_apartment))
        .route(
            "/admin/bookings/:id/refund",
            post(handlers::admin::complete_refund),
        )
        .route("/admin/sweep", post(handlers::admin::sweep));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
