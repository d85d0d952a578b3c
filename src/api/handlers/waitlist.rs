//! Waitlist handler.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::JoinWaitlistRequest;
use crate::api::extract::ApiJson;
use crate::app_state::AppState;
use crate::domain::{FacilityId, Principal, WaitlistEntry};
use crate::error::{BookingError, ErrorResponse};

/// `POST /bookings/waitlist`: Queue for a facility on a date.
///
/// # Errors
///
/// Returns [`BookingError`] for an unknown facility or a past date.
#[utoipa::path(
    post,
    path = "/api/v1/bookings/waitlist",
    tag = "Waitlist",
    summary = "Join the waitlist",
    description = "Queues the caller for the facility on `target_date`. Joining twice returns the existing entry. When a booking on that day is cancelled the first eligible entry is promoted into it.",
    request_body = JoinWaitlistRequest,
    responses(
        (status = 201, description = "Waitlist entry", body = WaitlistEntry),
        (status = 400, description = "Date in the past", body = ErrorResponse),
        (status = 404, description = "Facility not found", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn join_waitlist(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<JoinWaitlistRequest>,
) -> Result<impl IntoResponse, BookingError> {
    let entry = state
        .bookings
        .join_waitlist(
            &principal,
            FacilityId::from_uuid(req.facility_id),
            req.target_date,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Waitlist routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/bookings/waitlist", post(join_waitlist))
}
