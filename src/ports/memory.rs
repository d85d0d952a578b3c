//! In-memory catalogue, user and tenant directories.
//!
//! Backs the non-persistent mode and the test suite. Records are keyed by
//! id and every lookup re-checks the tenant.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{FacilityCatalog, TenantDirectory, UserDirectory};
use crate::domain::{ClubId, Facility, FacilityId, MaintenanceTask, UserId, UserProfile};
use crate::error::BookingError;

/// Process-local implementation of the read-only collaborator ports.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    clubs: RwLock<BTreeSet<ClubId>>,
    facilities: RwLock<HashMap<FacilityId, Facility>>,
    maintenance: RwLock<Vec<(ClubId, MaintenanceTask)>>,
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryCatalog {
    /// Creates an empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a club.
    pub async fn add_club(&self, club_id: ClubId) {
        self.clubs.write().await.insert(club_id);
    }

    /// Inserts or replaces a facility and registers its club.
    pub async fn put_facility(&self, facility: Facility) {
        self.add_club(facility.club_id).await;
        self.facilities.write().await.insert(facility.id, facility);
    }

    /// Schedules a maintenance task under `club_id`.
    pub async fn add_maintenance(&self, club_id: ClubId, task: MaintenanceTask) {
        self.maintenance.write().await.push((club_id, task));
    }

    /// Inserts or replaces a user and registers their club.
    pub async fn put_user(&self, user: UserProfile) {
        self.add_club(user.club_id).await;
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl FacilityCatalog for InMemoryCatalog {
    async fn get_facility(
        &self,
        club_id: ClubId,
        id: FacilityId,
    ) -> Result<Option<Facility>, BookingError> {
        Ok(self
            .facilities
            .read()
            .await
            .get(&id)
            .filter(|f| f.club_id == club_id)
            .cloned())
    }

    async fn has_maintenance_conflict(
        &self,
        club_id: ClubId,
        facility_id: FacilityId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, BookingError> {
        Ok(self
            .maintenance
            .read()
            .await
            .iter()
            .any(|(club, task)| {
                *club == club_id && task.facility_id == facility_id && task.blocks(start, end)
            }))
    }

    async fn list_maintenance(
        &self,
        club_id: ClubId,
        facility_id: FacilityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceTask>, BookingError> {
        Ok(self
            .maintenance
            .read()
            .await
            .iter()
            .filter(|(club, task)| {
                *club == club_id
                    && task.facility_id == facility_id
                    && task.start < to
                    && task.end > from
            })
            .map(|(_, task)| task.clone())
            .collect())
    }
}

#[async_trait]
impl UserDirectory for InMemoryCatalog {
    async fn get_user(
        &self,
        club_id: ClubId,
        id: UserId,
    ) -> Result<Option<UserProfile>, BookingError> {
        Ok(self
            .users
            .read()
            .await
            .get(&id)
            .filter(|u| u.club_id == club_id)
            .cloned())
    }
}

#[async_trait]
impl TenantDirectory for InMemoryCatalog {
    async fn list_clubs(&self) -> Result<Vec<ClubId>, BookingError> {
        Ok(self.clubs.read().await.iter().copied().collect())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::facility::{MaintenanceStatus, MedicalCertStatus};
    use crate::domain::FacilityStatus;
    use chrono::{Duration, NaiveTime, TimeZone};
    use rust_decimal::Decimal;

    fn facility(club_id: ClubId) -> Facility {
        let (Some(open), Some(close)) = (
            NaiveTime::from_hms_opt(8, 0, 0),
            NaiveTime::from_hms_opt(22, 0, 0),
        ) else {
            panic!("valid times");
        };
        Facility {
            id: FacilityId::new(),
            club_id,
            name: "Court 1".to_string(),
            status: FacilityStatus::Active,
            capacity: 4,
            hourly_rate: Decimal::ONE_HUNDRED,
            guest_fee: Decimal::ZERO,
            opening_time: open,
            closing_time: close,
        }
    }

    #[tokio::test]
    async fn facility_is_tenant_scoped() {
        let catalog = InMemoryCatalog::new();
        let club = ClubId::new();
        let f = facility(club);
        catalog.put_facility(f.clone()).await;

        assert!(matches!(catalog.get_facility(club, f.id).await, Ok(Some(_))));
        assert!(matches!(
            catalog.get_facility(ClubId::new(), f.id).await,
            Ok(None)
        ));
        let Ok(clubs) = catalog.list_clubs().await else {
            panic!("list_clubs failed");
        };
        assert_eq!(clubs, vec![club]);
    }

    #[tokio::test]
    async fn maintenance_conflict_uses_half_open_windows() {
        let catalog = InMemoryCatalog::new();
        let club = ClubId::new();
        let facility_id = FacilityId::new();
        let Some(start) = Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).single() else {
            panic!("valid timestamp");
        };
        catalog
            .add_maintenance(
                club,
                MaintenanceTask {
                    facility_id,
                    start,
                    end: start + Duration::hours(1),
                    status: MaintenanceStatus::Scheduled,
                },
            )
            .await;

        let hit = catalog
            .has_maintenance_conflict(club, facility_id, start, start + Duration::minutes(30))
            .await;
        assert!(matches!(hit, Ok(true)));
        let touching = catalog
            .has_maintenance_conflict(
                club,
                facility_id,
                start + Duration::hours(1),
                start + Duration::hours(2),
            )
            .await;
        assert!(matches!(touching, Ok(false)));
    }

    #[tokio::test]
    async fn user_lookup() {
        let catalog = InMemoryCatalog::new();
        let club = ClubId::new();
        let user = UserProfile {
            id: UserId::new(),
            club_id: club,
            email: "a@example.com".to_string(),
            medical_cert_status: MedicalCertStatus::Valid,
            medical_cert_expiry: None,
        };
        catalog.put_user(user.clone()).await;
        let Ok(Some(found)) = catalog.get_user(club, user.id).await else {
            panic!("user should exist");
        };
        assert_eq!(found, user);
    }
}
