//! Availability lookup.
//!
//! - GET /api/apartments/:id/availability?checkin=&checkout=

use crate::state::AppState;
use crate::WebResult;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use staybook_core::{ApartmentId, Availability, NaiveDate};
use uuid::Uuid;

/// Query string of an availability check.
#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    /// First night (`YYYY-MM-DD`)
    pub checkin: NaiveDate,
    /// Departure day (`YYYY-MM-DD`, exclusive)
    pub checkout: NaiveDate,
}

/// Check whether an apartment is free for a stay.
///
/// Public: no authentication required. Lapsed holds never block.
///
/// # Errors
///
/// - 422: illogical dates or check-in not in the future
/// - 404: apartment missing or unlisted
pub async fn check_availability(
    State(state): State<AppState>,
    Path(apartment_id): Path<Uuid>,
    Query(query): Query<AvailabilityQuery>,
) -> WebResult<Json<Availability>> {
    let availability = state
        .manager
        .check_availability(
            ApartmentId::from_uuid(apartment_id),
            query.checkin,
            query.checkout,
        )
        .await?;

    Ok(Json(availability))
}
