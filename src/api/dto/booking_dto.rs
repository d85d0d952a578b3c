//! Booking request and response bodies.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{Booking, BookingStatus, FacilityId, Slot, UserId};
use crate::service::{BookingQuery, CreatedBooking, GuestRequest, NewBooking};

/// A guest as submitted by the client. The fee is set by the facility.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GuestDto {
    /// Guest full name.
    pub name: String,
    /// National identity document number.
    pub dni: String,
}

/// Request body for `POST /bookings`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateBookingRequest {
    /// Facility to reserve.
    pub facility_id: uuid::Uuid,
    /// Inclusive start (UTC).
    pub start_time: DateTime<Utc>,
    /// Exclusive end (UTC).
    pub end_time: DateTime<Utc>,
    /// Guests brought along by the owner.
    #[serde(default)]
    pub guest_details: Vec<GuestDto>,
    /// Owner when an admin books on a member's behalf; ignored otherwise.
    #[serde(default)]
    pub user_id: Option<uuid::Uuid>,
}

impl From<CreateBookingRequest> for NewBooking {
    fn from(req: CreateBookingRequest) -> Self {
        Self {
            facility_id: FacilityId::from_uuid(req.facility_id),
            start_time: req.start_time,
            end_time: req.end_time,
            guests: req
                .guest_details
                .into_iter()
                .map(|g| GuestRequest {
                    name: g.name,
                    dni: g.dni,
                })
                .collect(),
            owner_id: req.user_id.map(UserId::from_uuid),
        }
    }
}

/// Response body for `POST /bookings`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateBookingResponse {
    /// The admitted booking.
    pub booking: Booking,
    /// Where the owner pays; absent for free bookings.
    pub checkout_url: Option<String>,
}

impl From<CreatedBooking> for CreateBookingResponse {
    fn from(created: CreatedBooking) -> Self {
        Self {
            booking: created.booking,
            checkout_url: created.checkout_url,
        }
    }
}

/// Filters for `GET /bookings` and `GET /bookings/all`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BookingListParams {
    /// Only this facility.
    pub facility_id: Option<uuid::Uuid>,
    /// Only this status (e.g. `CONFIRMED`).
    pub status: Option<BookingStatus>,
    /// Only bookings ending after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only bookings starting before this instant.
    pub to: Option<DateTime<Utc>>,
}

impl From<BookingListParams> for BookingQuery {
    fn from(params: BookingListParams) -> Self {
        Self {
            facility_id: params.facility_id.map(FacilityId::from_uuid),
            status: params.status,
            from: params.from,
            to: params.to,
        }
    }
}

/// Query for `GET /bookings/availability`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AvailabilityParams {
    /// Facility to inspect.
    pub facility_id: uuid::Uuid,
    /// Day to render (`YYYY-MM-DD`).
    pub date: NaiveDate,
}

/// Response body for `GET /bookings/availability`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AvailabilityResponse {
    /// Facility inspected.
    pub facility_id: uuid::Uuid,
    /// Day rendered.
    pub date: NaiveDate,
    /// Slots from opening to closing time.
    pub slots: Vec<Slot>,
}

/// Response body for `POST /bookings/{id}/checkout`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    /// Booking being paid.
    pub booking_id: uuid::Uuid,
    /// Processor checkout URL.
    pub checkout_url: String,
}
