//! Error types for web handlers.
//!
//! This module bridges [`BookingError`] and HTTP responses, implementing
//! Axum's `IntoResponse` trait. Every lifecycle guard gets its own status
//! and error code so clients can tell them apart.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use staybook_core::{BookingError, StoreError};
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Booking>, AppError> {
///     let booking = state.manager.confirm_booking(id).await?;
///     Ok(Json(booking))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Structured payload returned alongside the message
    details: Option<serde_json::Value>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            details: None,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach a structured `details` payload.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// HTTP status of this error
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            message.into(),
            "UNAUTHORIZED".to_string(),
        )
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            message.into(),
            "FORBIDDEN".to_string(),
        )
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            message.into(),
            "CONFLICT".to_string(),
        )
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            message.into(),
            "VALIDATION_ERROR".to_string(),
        )
    }

    /// Create a 410 Gone error for a hold that can no longer be honoured.
    #[must_use]
    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, message.into(), "HOLD_EXPIRED".to_string())
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
    /// Structured details, e.g. conflicting reservations.
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log internal errors
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Internal server error"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };

        (self.status, Json(body)).into_response()
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

/// Map each lifecycle failure to its own status and code.
impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        let message = err.to_string();
        match err {
            BookingError::InvalidRange(_) | BookingError::Validation(_) => {
                Self::validation(message)
            }
            BookingError::Conflict { conflicts } => Self::conflict(message)
                .with_details(serde_json::json!({ "conflicts": conflicts })),
            BookingError::NotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, message, "NOT_FOUND".to_string())
            }
            BookingError::AlreadyTerminal { status, .. } => Self::new(
                StatusCode::CONFLICT,
                message,
                "ALREADY_TERMINAL".to_string(),
            )
            .with_details(serde_json::json!({ "status": status })),
            BookingError::TooLate { start_date, .. } => {
                Self::new(StatusCode::CONFLICT, message, "TOO_LATE".to_string())
                    .with_details(serde_json::json!({ "start_date": start_date }))
            }
            BookingError::Expired { .. } => Self::gone(message),
            BookingError::Forbidden(_) => Self::forbidden(message),
            BookingError::InvalidPaymentState { status, .. } => Self::new(
                StatusCode::CONFLICT,
                message,
                "INVALID_PAYMENT_STATE".to_string(),
            )
            .with_details(serde_json::json!({ "status": status })),
            BookingError::Store(StoreError::Stale { .. }) => Self::new(
                StatusCode::CONFLICT,
                "Booking was changed by another request, retry".to_string(),
                "CONCURRENT_UPDATE".to_string(),
            ),
            BookingError::Store(store) => {
                Self::internal("An internal error occurred").with_source(anyhow::Error::new(store))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use staybook_core::{BookingId, BookingStatus, Conflict, NaiveDate, StayDates};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_not_found() {
        let err = AppError::not_found("Booking", "123");
        assert_eq!(err.to_string(), "[NOT_FOUND] Booking with id 123 not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation() {
        let err = AppError::validation("checkout must follow checkin");
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, "VALIDATION_ERROR");
    }

    #[test]
    fn test_booking_errors_get_distinct_codes() {
        let booking_id = BookingId::new();
        let cases = [
            (
                BookingError::InvalidRange("past".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
            ),
            (
                BookingError::AlreadyTerminal {
                    booking_id,
                    status: BookingStatus::Cancelled,
                },
                StatusCode::CONFLICT,
                "ALREADY_TERMINAL",
            ),
            (
                BookingError::TooLate {
                    booking_id,
                    start_date: date("2025-06-10"),
                },
                StatusCode::CONFLICT,
                "TOO_LATE",
            ),
            (
                BookingError::Expired { booking_id },
                StatusCode::GONE,
                "HOLD_EXPIRED",
            ),
            (
                BookingError::Forbidden("not yours".to_string()),
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
            ),
            (
                BookingError::not_found("booking", booking_id),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                BookingError::Store(StoreError::Stale { booking_id }),
                StatusCode::CONFLICT,
                "CONCURRENT_UPDATE",
            ),
            (
                BookingError::Store(StoreError::Database("down".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
        ];

        for (booking_error, status, code) in cases {
            let err = AppError::from(booking_error);
            assert_eq!(err.status(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_conflict_carries_conflicting_ranges() {
        let stay = StayDates::new(date("2025-06-10"), date("2025-06-15")).unwrap();
        let conflict = Conflict {
            booking_id: BookingId::new(),
            stay,
        };

        let err = AppError::from(BookingError::Conflict {
            conflicts: vec![conflict],
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "CONFLICT");
        let details = err.details.unwrap();
        assert_eq!(details["conflicts"][0]["start_date"], "2025-06-10");
        assert_eq!(details["conflicts"][0]["end_date"], "2025-06-15");
    }

    #[test]
    fn test_store_errors_hide_internals() {
        let err = AppError::from(BookingError::Store(StoreError::Corrupt("bad row".to_string())));
        assert_eq!(err.to_string(), "[INTERNAL_SERVER_ERROR] An internal error occurred");
        assert!(std::error::Error::source(&err).is_some());
    }
}
