//! Ports to the collaborators the engine depends on but does not own.
//!
//! Each port is an object-safe `async_trait` wired as `Arc<dyn Port>` at
//! startup. Lookups take the caller's [`ClubId`] so an adapter can never
//! return another tenant's record.

pub mod memory;
pub mod postgres;

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ClubId, Facility, FacilityId, GatewayPayment, MaintenanceTask, OutboxMessage, Payment,
    PaymentStatus, UserId, UserProfile,
};
use crate::error::BookingError;
use crate::persistence::StorageTx;

/// Read-only facility catalogue.
#[async_trait]
pub trait FacilityCatalog: Send + Sync + Debug {
    /// Looks up a facility under `club_id`.
    async fn get_facility(
        &self,
        club_id: ClubId,
        id: FacilityId,
    ) -> Result<Option<Facility>, BookingError>;

    /// Returns `true` if a blocking maintenance task overlaps `[start, end)`.
    async fn has_maintenance_conflict(
        &self,
        club_id: ClubId,
        facility_id: FacilityId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, BookingError>;

    /// Maintenance tasks on `facility_id` overlapping `[from, to)`.
    async fn list_maintenance(
        &self,
        club_id: ClubId,
        facility_id: FacilityId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceTask>, BookingError>;
}

/// Read-only user service.
#[async_trait]
pub trait UserDirectory: Send + Sync + Debug {
    /// Looks up a user under `club_id`.
    async fn get_user(
        &self,
        club_id: ClubId,
        id: UserId,
    ) -> Result<Option<UserProfile>, BookingError>;
}

/// Enumerates tenants for background jobs.
#[async_trait]
pub trait TenantDirectory: Send + Sync + Debug {
    /// Every club the engine serves.
    async fn list_clubs(&self) -> Result<Vec<ClubId>, BookingError>;
}

/// An inbound webhook as seen by the HTTP layer.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    /// Event type (`type` or `topic`).
    pub event_type: Option<String>,
    /// Processor payment id (`data.id`).
    pub data_id: Option<String>,
    /// Raw `x-signature` header.
    pub signature: Option<String>,
    /// Raw `x-request-id` header.
    pub request_id: Option<String>,
}

/// External payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync + Debug {
    /// Creates a checkout preference for `payment` and returns its URL.
    ///
    /// The local payment id is passed as the preference's external reference
    /// so webhooks can be correlated before the processor assigns an id.
    async fn create_preference(
        &self,
        payment: &Payment,
        payer_email: &str,
        description: &str,
    ) -> Result<String, BookingError>;

    /// Fetches the processor's view of payment `data_id`. `None` if unknown.
    async fn process_webhook(&self, data_id: &str)
    -> Result<Option<GatewayPayment>, BookingError>;

    /// Verifies the webhook signature. Fails with [`BookingError::Forbidden`].
    fn validate_webhook(&self, request: &WebhookRequest) -> Result<(), BookingError>;

    /// Refunds a settled payment in full.
    async fn refund(&self, external_id: &str) -> Result<(), BookingError>;
}

/// Delivers notifications drained from the outbox.
#[async_trait]
pub trait NotificationSender: Send + Sync + Debug {
    /// Delivers one message. An error leaves it queued for the next run.
    async fn send(&self, message: &OutboxMessage) -> Result<(), BookingError>;
}

/// Reacts to a payment status change inside the webhook's transaction.
#[async_trait]
pub trait PaymentResponder: Send + Sync + Debug {
    /// Applies `new_status` of the payment for `reference_id`.
    async fn on_payment_status_changed(
        &self,
        tx: &mut dyn StorageTx,
        club_id: ClubId,
        reference_id: Uuid,
        new_status: PaymentStatus,
    ) -> Result<(), BookingError>;
}
