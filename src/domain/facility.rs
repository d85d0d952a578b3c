//! Read-only views of collaborator-owned records: facilities, maintenance
//! windows and users.

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::booking::windows_overlap;
use super::{ClubId, FacilityId, UserId};

/// Lifecycle status of a facility in the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FacilityStatus {
    /// Bookable.
    Active,
    /// Temporarily closed.
    Inactive,
    /// Closed for maintenance.
    Maintenance,
}

/// Catalogue view of a facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facility {
    /// Facility identifier.
    pub id: FacilityId,
    /// Owning club.
    pub club_id: ClubId,
    /// Display name.
    pub name: String,
    /// Lifecycle status.
    pub status: FacilityStatus,
    /// Maximum number of people on the facility, owner included.
    pub capacity: u32,
    /// Price per hour of use.
    pub hourly_rate: Decimal,
    /// Fee per guest.
    pub guest_fee: Decimal,
    /// Daily opening time (UTC).
    pub opening_time: NaiveTime,
    /// Daily closing time (UTC).
    pub closing_time: NaiveTime,
}

impl Facility {
    /// Returns `true` if the facility can take bookings.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == FacilityStatus::Active
    }

    /// Returns `true` if bookings on this facility require payment.
    #[must_use]
    pub fn is_priced(&self, guests: usize) -> bool {
        self.hourly_rate > Decimal::ZERO || (guests > 0 && self.guest_fee > Decimal::ZERO)
    }
}

/// Status of a maintenance task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaintenanceStatus {
    /// Planned.
    Scheduled,
    /// Work under way.
    InProgress,
    /// Finished.
    Completed,
    /// Called off.
    Cancelled,
}

/// A maintenance window on a facility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceTask {
    /// Affected facility.
    pub facility_id: FacilityId,
    /// Window start.
    pub start: DateTime<Utc>,
    /// Window end (exclusive).
    pub end: DateTime<Utc>,
    /// Task status.
    pub status: MaintenanceStatus,
}

impl MaintenanceTask {
    /// Returns `true` if this task prevents bookings in `[start, end)`.
    #[must_use]
    pub fn blocks(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            MaintenanceStatus::Scheduled | MaintenanceStatus::InProgress
        ) && windows_overlap(self.start, self.end, start, end)
    }
}

/// Medical certificate status held by the user service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MedicalCertStatus {
    /// Certificate on file and approved.
    Valid,
    /// Uploaded, awaiting review.
    Pending,
    /// Past its expiry.
    Expired,
    /// Never uploaded.
    Missing,
}

/// The slice of a user record the engine depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User identifier.
    pub id: UserId,
    /// Club the user belongs to.
    pub club_id: ClubId,
    /// Contact email, passed to the payment processor.
    pub email: String,
    /// Medical certificate status.
    pub medical_cert_status: MedicalCertStatus,
    /// Certificate expiry, if any.
    pub medical_cert_expiry: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Returns `true` if the certificate covers a booking starting at `start`.
    #[must_use]
    pub fn medical_certificate_valid_at(&self, start: DateTime<Utc>) -> bool {
        self.medical_cert_status == MedicalCertStatus::Valid
            && self.medical_cert_expiry.is_none_or(|expiry| expiry >= start)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid timestamp"))
    }

    fn user(status: MedicalCertStatus, expiry: Option<DateTime<Utc>>) -> UserProfile {
        UserProfile {
            id: UserId::new(),
            club_id: ClubId::new(),
            email: "member@example.com".to_string(),
            medical_cert_status: status,
            medical_cert_expiry: expiry,
        }
    }

    #[test]
    fn certificate_rules() {
        let start = t0();
        assert!(user(MedicalCertStatus::Valid, None).medical_certificate_valid_at(start));
        assert!(user(MedicalCertStatus::Valid, Some(start)).medical_certificate_valid_at(start));
        assert!(
            !user(MedicalCertStatus::Valid, Some(start - Duration::days(1)))
                .medical_certificate_valid_at(start)
        );
        assert!(!user(MedicalCertStatus::Pending, None).medical_certificate_valid_at(start));
    }

    #[test]
    fn only_open_maintenance_blocks() {
        let task = |status| MaintenanceTask {
            facility_id: FacilityId::new(),
            start: t0(),
            end: t0() + Duration::hours(2),
            status,
        };
        let (s, e) = (t0() + Duration::hours(1), t0() + Duration::hours(3));
        assert!(task(MaintenanceStatus::Scheduled).blocks(s, e));
        assert!(task(MaintenanceStatus::InProgress).blocks(s, e));
        assert!(!task(MaintenanceStatus::Completed).blocks(s, e));
        assert!(!task(MaintenanceStatus::Scheduled).blocks(t0() + Duration::hours(2), e));
    }
}
