//! Read-only catalogue adapter over the shared PostgreSQL database.
//!
//! Queries the `facilities`, `maintenance_tasks`, `users` and `clubs` tables
//! owned by the facility, user and tenancy modules. Every query carries a
//! `club_id` predicate except [`TenantDirectory::list_clubs`], which is the
//! one place tenants are enumerated.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{FacilityCatalog, TenantDirectory, UserDirectory};
use crate::domain::facility::{MaintenanceStatus, MedicalCertStatus};
use crate::domain::{
    ClubId, Facility, FacilityId, FacilityStatus, MaintenanceTask, UserId, UserProfile,
};
use crate::error::BookingError;

fn internal(err: sqlx::Error) -> BookingError {
    BookingError::Internal(format!("catalogue query failed: {err}"))
}

#[derive(Debug, FromRow)]
struct FacilityRow {
    id: Uuid,
    club_id: Uuid,
    name: String,
    status: String,
    capacity: i32,
    hourly_rate: Decimal,
    guest_fee: Decimal,
    opening_time: NaiveTime,
    closing_time: NaiveTime,
}

impl From<FacilityRow> for Facility {
    fn from(row: FacilityRow) -> Self {
        let status = match row.status.as_str() {
            "ACTIVE" => FacilityStatus::Active,
            "MAINTENANCE" => FacilityStatus::Maintenance,
            _ => FacilityStatus::Inactive,
        };
        Self {
            id: row.id.into(),
            club_id: row.club_id.into(),
            name: row.name,
            status,
            capacity: u32::try_from(row.capacity).unwrap_or(0),
            hourly_rate: row.hourly_rate,
            guest_fee: row.guest_fee,
            opening_time: row.opening_time,
            closing_time: row.closing_time,
        }
    }
}

#[derive(Debug, FromRow)]
struct MaintenanceRow {
    facility_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: String,
}

impl From<MaintenanceRow> for MaintenanceTask {
    fn from(row: MaintenanceRow) -> Self {
        let status = match row.status.as_str() {
            "SCHEDULED" => MaintenanceStatus::Scheduled,
            "IN_PROGRESS" => MaintenanceStatus::InProgress,
            "COMPLETED" => MaintenanceStatus::Completed,
            _ => MaintenanceStatus::Cancelled,
        };
        Self {
            facility_id: row.facility_id.into(),
            start: row.start_time,
            end: row.end_time,
            status,
        }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    club_id: Uuid,
    email: String,
    medical_cert_status: String,
    medical_cert_expiry: Option<DateTime<Utc>>,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        let medical_cert_status = match row.medical_cert_status.as_str() {
            "VALID" => MedicalCertStatus::Valid,
            "PENDING" => MedicalCertStatus::Pending,
            "EXPIRED" => MedicalCertStatus::Expired,
            _ => MedicalCertStatus::Missing,
        };
        Self {
            id: row.id.into(),
            club_id: row.club_id.into(),
            email: row.email,
            medical_cert_status,
            medical_cert_expiry: row.medical_cert_expiry,
        }
    }
}

/// Catalogue, user and tenant lookups backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Creates an adapter over `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn maintenance_overlapping(
        &self,
        club_id: ClubId,
        facility_id: FacilityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceTask>, BookingError> {
        let rows = sqlx::query_as::<_, MaintenanceRow>(
            "SELECT facility_id, start_time, end_time, status FROM maintenance_tasks \
             WHERE club_id = $1 AND facility_id = $2 AND start_time < $4 AND end_time > $3 \
             ORDER BY start_time",
        )
        .bind(club_id.as_uuid())
        .bind(facility_id.as_uuid())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        Ok(rows.into_iter().map(MaintenanceTask::from).collect())
    }
}

#[async_trait]
impl FacilityCatalog for PgCatalog {
    async fn get_facility(
        &self,
        club_id: ClubId,
        id: FacilityId,
    ) -> Result<Option<Facility>, BookingError> {
        let row = sqlx::query_as::<_, FacilityRow>(
            "SELECT id, club_id, name, status, capacity, hourly_rate, guest_fee, \
             opening_time, closing_time FROM facilities WHERE club_id = $1 AND id = $2",
        )
        .bind(club_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        Ok(row.map(Facility::from))
    }

    async fn has_maintenance_conflict(
        &self,
        club_id: ClubId,
        facility_id: FacilityId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, BookingError> {
        let tasks = self
            .maintenance_overlapping(club_id, facility_id, start, end)
            .await?;
        Ok(tasks.iter().any(|task| task.blocks(start, end)))
    }

    async fn list_maintenance(
        &self,
        club_id: ClubId,
        facility_id: FacilityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceTask>, BookingError> {
        self.maintenance_overlapping(club_id, facility_id, from, to)
            .await
    }
}

#[async_trait]
impl UserDirectory for PgCatalog {
    async fn get_user(
        &self,
        club_id: ClubId,
        id: UserId,
    ) -> Result<Option<UserProfile>, BookingError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, club_id, email, medical_cert_status, medical_cert_expiry \
             FROM users WHERE club_id = $1 AND id = $2",
        )
        .bind(club_id.as_uuid())
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;
        Ok(row.map(UserProfile::from))
    }
}

#[async_trait]
impl TenantDirectory for PgCatalog {
    async fn list_clubs(&self) -> Result<Vec<ClubId>, BookingError> {
        let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM clubs ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        Ok(ids.into_iter().map(ClubId::from).collect())
    }
}
