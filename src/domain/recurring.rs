//! Recurring booking rules and their expansion into concrete windows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{ClubId, FacilityId, RuleId, UserId};
use crate::error::BookingError;

/// What a recurring rule reserves the facility for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    /// A coached class.
    Class,
    /// A maintenance block; materialised under the system principal.
    Maintenance,
    /// A fixed weekly slot held by a member or group.
    Fixed,
}

impl RuleType {
    /// Returns the wire / database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Class => "CLASS",
            Self::Maintenance => "MAINTENANCE",
            Self::Fixed => "FIXED",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLASS" => Ok(Self::Class),
            "MAINTENANCE" => Ok(Self::Maintenance),
            "FIXED" => Ok(Self::Fixed),
            other => Err(BookingError::InvalidInput(format!(
                "unknown rule type: {other}"
            ))),
        }
    }
}

/// A weekly reservation pattern on one facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecurringRule {
    /// Rule identifier.
    #[schema(value_type = uuid::Uuid)]
    pub id: RuleId,
    /// Owning club.
    #[schema(value_type = uuid::Uuid)]
    pub club_id: ClubId,
    /// Facility the rule reserves.
    #[schema(value_type = uuid::Uuid)]
    pub facility_id: FacilityId,
    /// Purpose of the reservation.
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    /// Day of week, 0 = Sunday … 6 = Saturday.
    pub day_of_week: u8,
    /// Start time of day (UTC).
    #[schema(value_type = String, example = "18:00:00")]
    pub start_time: NaiveTime,
    /// End time of day (UTC), exclusive.
    #[schema(value_type = String, example = "19:30:00")]
    pub end_time: NaiveTime,
    /// First date the rule applies.
    pub start_date: NaiveDate,
    /// Last date the rule applies.
    pub end_date: NaiveDate,
    /// User the materialised bookings belong to.
    #[schema(value_type = Option<uuid::Uuid>)]
    pub owner_id: Option<UserId>,
    /// Group (team, class roster) the rule was created for.
    pub group_id: Option<uuid::Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker; retired rules are never materialised.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One concrete window produced by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    /// Calendar date of the occurrence.
    pub date: NaiveDate,
    /// Window start.
    pub start: DateTime<Utc>,
    /// Window end.
    pub end: DateTime<Utc>,
}

impl RecurringRule {
    /// Checks the rule's shape.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidInput`] if the weekday is out of
    /// range or either window is empty.
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.day_of_week > 6 {
            return Err(BookingError::InvalidInput(
                "day_of_week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }
        if self.start_time >= self.end_time {
            return Err(BookingError::InvalidInput(
                "start_time must be before end_time".to_string(),
            ));
        }
        if [self.start_time, self.end_time]
            .iter()
            .any(|t| t.second() != 0 || t.nanosecond() != 0)
        {
            return Err(BookingError::InvalidInput(
                "start_time and end_time must fall on whole minutes".to_string(),
            ));
        }
        if self.start_date > self.end_date {
            return Err(BookingError::InvalidInput(
                "start_date must not be after end_date".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns `true` while the rule still produces bookings.
    #[must_use]
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.deleted_at.is_none() && self.end_date >= today
    }

    /// Expands the rule over `[today, today + horizon_days]`, clipped to the
    /// rule's own date range.
    #[must_use]
    pub fn occurrences(&self, today: NaiveDate, horizon_days: u32) -> Vec<Occurrence> {
        let horizon_end = today + Duration::days(i64::from(horizon_days));
        let from = today.max(self.start_date);
        let to = horizon_end.min(self.end_date);

        from.iter_days()
            .take_while(|d| *d <= to)
            .filter(|d| d.weekday().num_days_from_sunday() == u32::from(self.day_of_week))
            .map(|date| Occurrence {
                date,
                start: date.and_time(self.start_time).and_utc(),
                end: date.and_time(self.end_time).and_utc(),
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap_or_else(|| panic!("valid date"))
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap_or_else(|| panic!("valid time"))
    }

    fn rule(day_of_week: u8) -> RecurringRule {
        RecurringRule {
            id: RuleId::new(),
            club_id: ClubId::new(),
            facility_id: FacilityId::new(),
            rule_type: RuleType::Class,
            day_of_week,
            start_time: time(18, 0),
            end_time: time(19, 30),
            start_date: date(2025, 6, 1),
            end_date: date(2025, 6, 30),
            owner_id: None,
            group_id: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn expands_matching_weekdays_only() {
        // 2025-06-02 is a Monday.
        let occ = rule(1).occurrences(date(2025, 6, 1), 14);
        let dates: Vec<NaiveDate> = occ.iter().map(|o| o.date).collect();
        assert_eq!(dates, vec![date(2025, 6, 2), date(2025, 6, 9)]);
        let Some(first) = occ.first() else {
            panic!("expected an occurrence");
        };
        assert_eq!(first.start, date(2025, 6, 2).and_time(time(18, 0)).and_utc());
        assert_eq!(first.end, date(2025, 6, 2).and_time(time(19, 30)).and_utc());
    }

    #[test]
    fn horizon_end_is_inclusive() {
        let occ = rule(1).occurrences(date(2025, 6, 2), 14);
        let dates: Vec<NaiveDate> = occ.iter().map(|o| o.date).collect();
        assert_eq!(dates, vec![date(2025, 6, 2), date(2025, 6, 9), date(2025, 6, 16)]);
        assert_eq!(rule(1).occurrences(date(2025, 6, 2), 13).len(), 2);
    }

    #[test]
    fn clipped_to_rule_end_date() {
        let occ = rule(1).occurrences(date(2025, 6, 20), 60);
        assert_eq!(occ.len(), 2); // 23rd and 30th
    }

    #[test]
    fn sunday_is_zero() {
        let occ = rule(0).occurrences(date(2025, 6, 1), 0);
        assert_eq!(occ.len(), 1);
    }

    #[test]
    fn validation() {
        assert!(rule(1).validate().is_ok());
        assert!(rule(7).validate().is_err());
        let mut r = rule(1);
        r.end_time = r.start_time;
        assert!(r.validate().is_err());
        let mut r = rule(1);
        r.end_time = NaiveTime::from_hms_opt(19, 30, 15).unwrap_or_else(|| panic!("valid time"));
        assert!(r.validate().is_err());
    }

    #[test]
    fn activity_window() {
        let mut r = rule(1);
        assert!(r.is_active(date(2025, 6, 30)));
        assert!(!r.is_active(date(2025, 7, 1)));
        r.deleted_at = Some(Utc::now());
        assert!(!r.is_active(date(2025, 6, 10)));
    }
}
