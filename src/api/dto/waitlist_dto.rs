//! Waitlist request body.

use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::ToSchema;

/// Request body for `POST /bookings/waitlist`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct JoinWaitlistRequest {
    /// Facility to wait on.
    pub facility_id: uuid::Uuid,
    /// Day the caller wants to play.
    pub target_date: NaiveDate,
}
