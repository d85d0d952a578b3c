//! Booking handlers: create, list, get, cancel, availability, checkout,
//! refund.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{
    AckResponse, AvailabilityParams, AvailabilityResponse, BookingListParams, CheckoutResponse,
    CreateBookingRequest, CreateBookingResponse,
};
use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::app_state::AppState;
use crate::domain::{Booking, BookingId, FacilityId, Principal};
use crate::error::{BookingError, ErrorResponse};

/// `POST /bookings`: Reserve a facility window.
///
/// # Errors
///
/// Returns [`BookingError`] when a precondition fails or the window is taken.
#[utoipa::path(
    post,
    path = "/api/v1/bookings",
    tag = "Bookings",
    summary = "Create a booking",
    description = "Admits a booking for the caller (or, for admins, on behalf of `user_id`). Priced bookings start in PENDING_PAYMENT and come back with a checkout URL; free ones are CONFIRMED immediately.",
    request_body = CreateBookingRequest,
    responses(
        (status = 201, description = "Booking admitted", body = CreateBookingResponse),
        (status = 400, description = "Invalid window or guests", body = ErrorResponse),
        (status = 404, description = "Unknown facility or owner", body = ErrorResponse),
        (status = 409, description = "Window overlaps a booking or maintenance", body = ErrorResponse),
        (status = 422, description = "Facility inactive or certificate invalid", body = ErrorResponse),
        (status = 502, description = "Payment processor unavailable", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn create_booking(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<CreateBookingRequest>,
) -> Result<impl IntoResponse, BookingError> {
    let created = state.bookings.create_booking(&principal, req.into()).await?;
    Ok((StatusCode::CREATED, Json(CreateBookingResponse::from(created))))
}

/// `GET /bookings`: The caller's own bookings.
///
/// # Errors
///
/// Returns [`BookingError`] on storage failure.
#[utoipa::path(
    get,
    path = "/api/v1/bookings",
    tag = "Bookings",
    summary = "List own bookings",
    description = "Returns the caller's bookings, earliest window first, optionally filtered by facility and status.",
    params(BookingListParams),
    responses(
        (status = 200, description = "Own bookings", body = Vec<Booking>),
    ),
    security(("bearer" = []))
)]
pub async fn list_own_bookings(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(params): ApiQuery<BookingListParams>,
) -> Result<impl IntoResponse, BookingError> {
    let bookings = state
        .bookings
        .list_own_bookings(&principal, params.into())
        .await?;
    Ok(Json(bookings))
}

/// `GET /bookings/all`: Every booking of the club.
///
/// # Errors
///
/// Returns [`BookingError::Forbidden`] for non-admins.
#[utoipa::path(
    get,
    path = "/api/v1/bookings/all",
    tag = "Bookings",
    summary = "List club bookings",
    description = "Admin view of the club's bookings, filtered by facility, status and time range.",
    params(BookingListParams),
    responses(
        (status = 200, description = "Club bookings", body = Vec<Booking>),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn list_all_bookings(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(params): ApiQuery<BookingListParams>,
) -> Result<impl IntoResponse, BookingError> {
    let bookings = state
        .bookings
        .list_all_bookings(&principal, params.into())
        .await?;
    Ok(Json(bookings))
}

/// `GET /bookings/{id}`: One booking.
///
/// # Errors
///
/// Returns [`BookingError::NotFound`] or [`BookingError::Forbidden`].
#[utoipa::path(
    get,
    path = "/api/v1/bookings/{id}",
    tag = "Bookings",
    summary = "Get a booking",
    description = "Visible to the booking owner and club admins.",
    params(("id" = uuid::Uuid, Path, description = "Booking UUID")),
    responses(
        (status = 200, description = "Booking", body = Booking),
        (status = 403, description = "Not the owner", body = ErrorResponse),
        (status = 404, description = "Booking not found", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn get_booking(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<uuid::Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let booking = state
        .bookings
        .get_booking(&principal, BookingId::from_uuid(id))
        .await?;
    Ok(Json(booking))
}

/// `DELETE /bookings/{id}`: Cancel a booking.
///
/// # Errors
///
/// Returns [`BookingError`] if the booking is unknown, foreign or inactive.
#[utoipa::path(
    delete,
    path = "/api/v1/bookings/{id}",
    tag = "Bookings",
    summary = "Cancel a booking",
    description = "Cancels an active booking. A paid booking cancelled at least the refund window before its start is refunded; the freed slot is offered to the waitlist.",
    params(("id" = uuid::Uuid, Path, description = "Booking UUID")),
    responses(
        (status = 200, description = "Cancelled booking", body = Booking),
        (status = 403, description = "Not the owner", body = ErrorResponse),
        (status = 404, description = "Booking not found", body = ErrorResponse),
        (status = 409, description = "Booking is not active", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn cancel_booking(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<uuid::Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let booking = state
        .bookings
        .cancel_booking(&principal, BookingId::from_uuid(id))
        .await?;
    Ok(Json(booking))
}

/// `GET /bookings/availability`: A facility's day as slots.
///
/// # Errors
///
/// Returns [`BookingError::NotFound`] for an unknown facility.
#[utoipa::path(
    get,
    path = "/api/v1/bookings/availability",
    tag = "Bookings",
    summary = "Facility availability",
    description = "Splits the facility's opening hours on `date` into slots marked FREE, BOOKED or MAINTENANCE.",
    params(AvailabilityParams),
    responses(
        (status = 200, description = "Slot list", body = AvailabilityResponse),
        (status = 404, description = "Facility not found", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn availability(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(params): ApiQuery<AvailabilityParams>,
) -> Result<impl IntoResponse, BookingError> {
    let slots = state
        .bookings
        .availability(
            &principal,
            FacilityId::from_uuid(params.facility_id),
            params.date,
        )
        .await?;
    Ok(Json(AvailabilityResponse {
        facility_id: params.facility_id,
        date: params.date,
        slots,
    }))
}

/// `POST /bookings/{id}/checkout`: Re-open payment for a pending booking.
///
/// # Errors
///
/// Returns [`BookingError`] if the booking is not awaiting payment or the
/// processor is unavailable.
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/checkout",
    tag = "Bookings",
    summary = "Open checkout",
    description = "Creates a new checkout for a PENDING_PAYMENT booking, e.g. one promoted from the waitlist or materialised from a rule.",
    params(("id" = uuid::Uuid, Path, description = "Booking UUID")),
    responses(
        (status = 200, description = "Checkout URL", body = CheckoutResponse),
        (status = 409, description = "Booking is not awaiting payment", body = ErrorResponse),
        (status = 502, description = "Payment processor unavailable", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn checkout(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<uuid::Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    let checkout_url = state
        .bookings
        .checkout(&principal, BookingId::from_uuid(id))
        .await?;
    Ok(Json(CheckoutResponse {
        booking_id: id,
        checkout_url,
    }))
}

/// `POST /bookings/{id}/refund`: Refund a cancelled booking.
///
/// # Errors
///
/// Returns [`BookingError`] for non-admins, active bookings, or a processor
/// that keeps refusing.
#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/refund",
    tag = "Bookings",
    summary = "Refund a cancelled booking",
    description = "Admin retry for a refund that failed during cancellation. Refunding twice is a no-op.",
    params(("id" = uuid::Uuid, Path, description = "Booking UUID")),
    responses(
        (status = 200, description = "Refunded", body = AckResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
        (status = 404, description = "No settled payment", body = ErrorResponse),
        (status = 409, description = "Booking is not cancelled", body = ErrorResponse),
        (status = 502, description = "Processor refused the refund", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn refund_booking(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<uuid::Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    state
        .bookings
        .refund_booking(&principal, BookingId::from_uuid(id))
        .await?;
    Ok(Json(AckResponse::new("refunded")))
}

/// Booking routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_own_bookings))
        .route("/bookings/all", get(list_all_bookings))
        .route("/bookings/availability", get(availability))
        .route("/bookings/{id}", get(get_booking).delete(cancel_booking))
        .route("/bookings/{id}/checkout", post(checkout))
        .route("/bookings/{id}/refund", post(refund_booking))
}
