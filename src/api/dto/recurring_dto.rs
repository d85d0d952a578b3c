//! Recurring rule bodies.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::domain::{FacilityId, RuleType, UserId};
use crate::service::{GenerationSummary, NewRule};

/// Request body for `POST /bookings/recurring`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateRuleRequest {
    /// Facility the rule reserves.
    pub facility_id: uuid::Uuid,
    /// `CLASS`, `MAINTENANCE` or `FIXED`.
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Day of week, 0 = Sunday.
    pub day_of_week: u8,
    /// Start time of day (UTC).
    #[schema(value_type = String, example = "18:00:00")]
    pub start_time: NaiveTime,
    /// End time of day (UTC).
    #[schema(value_type = String, example = "19:30:00")]
    pub end_time: NaiveTime,
    /// First date the rule applies.
    pub start_date: NaiveDate,
    /// Last date the rule applies.
    pub end_date: NaiveDate,
    /// Owner of the materialised bookings; defaults to the caller.
    #[serde(default)]
    pub owner_id: Option<uuid::Uuid>,
    /// Group the rule is for.
    #[serde(default)]
    pub group_id: Option<uuid::Uuid>,
}

impl From<CreateRuleRequest> for NewRule {
    fn from(req: CreateRuleRequest) -> Self {
        Self {
            facility_id: FacilityId::from_uuid(req.facility_id),
            rule_type: req.rule_type,
            day_of_week: req.day_of_week,
            start_time: req.start_time,
            end_time: req.end_time,
            start_date: req.start_date,
            end_date: req.end_date,
            owner_id: req.owner_id.map(UserId::from_uuid),
            group_id: req.group_id,
        }
    }
}

/// Query for `POST /bookings/generate`.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GenerateParams {
    /// Days ahead to materialise. Defaults to the booking horizon.
    pub horizon_days: Option<u32>,
}

/// Response body for `POST /bookings/generate`.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct GenerationSummaryDto {
    /// Bookings created.
    pub created: u32,
    /// Occurrences skipped.
    pub skipped: u32,
    /// Occurrences already materialised.
    pub existing: u32,
}

impl From<GenerationSummary> for GenerationSummaryDto {
    fn from(s: GenerationSummary) -> Self {
        Self {
            created: s.created,
            skipped: s.skipped,
            existing: s.existing,
        }
    }
}
