//! Waitlist entries for fully booked facility days.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ClubId, FacilityId, UserId, WaitlistEntryId};
use crate::error::BookingError;

/// Status of a waitlist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitlistStatus {
    /// Waiting for a slot.
    Pending,
    /// Told about a freed slot.
    Notified,
    /// Turned into a booking.
    Consumed,
    /// Timed out.
    Expired,
}

impl WaitlistStatus {
    /// Returns the wire / database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Notified => "NOTIFIED",
            Self::Consumed => "CONSUMED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for WaitlistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaitlistStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "NOTIFIED" => Ok(Self::Notified),
            "CONSUMED" => Ok(Self::Consumed),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(BookingError::Internal(format!(
                "unknown waitlist status: {other}"
            ))),
        }
    }
}

/// A user's place in the queue for a facility on a given date.
///
/// Entries for the same `(resource_id, target_date)` are served FIFO by
/// `created_at`, ties broken by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WaitlistEntry {
    /// Entry identifier.
    #[schema(value_type = uuid::Uuid)]
    pub id: WaitlistEntryId,
    /// Owning club.
    #[schema(value_type = uuid::Uuid)]
    pub club_id: ClubId,
    /// Facility waited on.
    #[schema(value_type = uuid::Uuid)]
    pub resource_id: FacilityId,
    /// Waiting user.
    #[schema(value_type = uuid::Uuid)]
    pub user_id: UserId,
    /// Day the user wants to play.
    pub target_date: NaiveDate,
    /// Entry status.
    pub status: WaitlistStatus,
    /// Join timestamp.
    pub created_at: DateTime<Utc>,
}

impl WaitlistEntry {
    /// FIFO ordering key.
    #[must_use]
    pub fn queue_key(&self) -> (DateTime<Utc>, WaitlistEntryId) {
        (self.created_at, self.id)
    }
}
