//! Persistence layer: tenant-scoped, serializable units of work.
//!
//! [`Storage::begin`] opens a [`StorageTx`]. Every read and write on a
//! transaction takes the caller's [`ClubId`] first, so an unscoped query
//! cannot be expressed. A transaction either commits as a whole or, when
//! dropped without [`StorageTx::commit`], rolls back as a whole; outbox rows
//! enqueued on it share that fate.
//!
//! Two implementations exist: [`postgres::PgStorage`] (`SERIALIZABLE`
//! transactions plus a per-facility advisory lock) and
//! [`memory::MemoryStorage`] (whole-store lock, used by tests and the
//! non-persistent mode).

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::{
    Booking, BookingId, BookingStatus, ClubId, FacilityId, OutboxId, OutboxMessage, Payment,
    PaymentId, RecurringRule, RuleId, UserId, WaitlistEntry, WaitlistEntryId, WaitlistStatus,
};

/// Storage-level failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// Concurrent transactions could not be serialised; safe to retry.
    #[error("serialization failure: {0}")]
    Serialization(String),
    /// A uniqueness or exclusion constraint rejected the write.
    #[error("constraint violation: {0}")]
    Conflict(String),
    /// The row to update does not exist under the given tenant.
    #[error("{0}")]
    NotFound(String),
    /// The storage deadline elapsed.
    #[error("storage deadline exceeded")]
    Timeout,
    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns `true` if the whole transaction may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }
}

/// Shorthand for storage results.
pub type StorageResult<T> = Result<T, StorageError>;

/// Rejects a nil club id: it means a caller forgot to thread the tenant
/// through.
pub(crate) fn scoped(club_id: ClubId) -> StorageResult<()> {
    if club_id.as_uuid().is_nil() {
        return Err(StorageError::Backend(
            "query issued without a tenant scope".to_string(),
        ));
    }
    Ok(())
}

/// Filter for booking listings. `None` fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    /// Only bookings owned by this user.
    pub user_id: Option<UserId>,
    /// Only bookings on this facility.
    pub facility_id: Option<FacilityId>,
    /// Only bookings in this status.
    pub status: Option<BookingStatus>,
    /// Only bookings ending after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only bookings starting before this instant.
    pub to: Option<DateTime<Utc>>,
}

impl BookingFilter {
    /// Returns `true` if `booking` passes the filter.
    #[must_use]
    pub fn matches(&self, booking: &Booking) -> bool {
        self.user_id.is_none_or(|u| booking.user_id == u)
            && self.facility_id.is_none_or(|f| booking.facility_id == f)
            && self.status.is_none_or(|s| booking.status == s)
            && self.from.is_none_or(|from| booking.end_time > from)
            && self.to.is_none_or(|to| booking.start_time < to)
    }
}

/// Opens units of work.
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Begins a serializable transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if no connection is available.
    async fn begin(&self) -> StorageResult<Box<dyn StorageTx>>;
}

/// A serializable unit of work. Dropping it without committing rolls back.
///
/// Methods are documented once here; every one of them can fail with a
/// [`StorageError`].
#[allow(clippy::missing_errors_doc)]
#[async_trait]
pub trait StorageTx: Send {
    // ── Bookings ────────────────────────────────────────────────────────

    /// Serialises admissions on `(facility, day of start)` for the rest of
    /// the transaction.
    async fn lock_facility_window(
        &mut self,
        club_id: ClubId,
        facility_id: FacilityId,
        start: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Active bookings on `facility_id` overlapping `[start, end)`.
    async fn find_overlapping_bookings(
        &mut self,
        club_id: ClubId,
        facility_id: FacilityId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<Booking>>;

    /// Inserts a new booking.
    async fn insert_booking(&mut self, booking: &Booking) -> StorageResult<()>;

    /// Loads a booking by id.
    async fn get_booking(&mut self, club_id: ClubId, id: BookingId)
    -> StorageResult<Option<Booking>>;

    /// Persists `status`, `payment_expiry` and `updated_at` of a booking.
    async fn update_booking(&mut self, booking: &Booking) -> StorageResult<()>;

    /// Lists bookings ordered by `start_time`.
    async fn list_bookings(
        &mut self,
        club_id: ClubId,
        filter: &BookingFilter,
    ) -> StorageResult<Vec<Booking>>;

    /// `PENDING_PAYMENT` bookings whose `payment_expiry < now`.
    async fn bookings_due_for_expiry(
        &mut self,
        club_id: ClubId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Booking>>;

    /// `CONFIRMED` bookings whose `end_time < cutoff`.
    async fn bookings_due_for_completion(
        &mut self,
        club_id: ClubId,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<Booking>>;

    /// Returns `true` if a non-cancelled booking was already materialised
    /// from `rule_id` starting at `start`.
    async fn rule_instance_exists(
        &mut self,
        club_id: ClubId,
        rule_id: RuleId,
        start: DateTime<Utc>,
    ) -> StorageResult<bool>;

    // ── Recurring rules ─────────────────────────────────────────────────

    /// Inserts a recurring rule.
    async fn insert_rule(&mut self, rule: &RecurringRule) -> StorageResult<()>;

    /// Loads a rule by id, including soft-deleted ones.
    async fn get_rule(&mut self, club_id: ClubId, id: RuleId)
    -> StorageResult<Option<RecurringRule>>;

    /// Rules not soft-deleted with `end_date >= today`.
    async fn list_active_rules(
        &mut self,
        club_id: ClubId,
        today: NaiveDate,
    ) -> StorageResult<Vec<RecurringRule>>;

    /// Marks a rule retired.
    async fn soft_delete_rule(
        &mut self,
        club_id: ClubId,
        id: RuleId,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    // ── Waitlist ────────────────────────────────────────────────────────

    /// Inserts a waitlist entry.
    async fn insert_waitlist_entry(&mut self, entry: &WaitlistEntry) -> StorageResult<()>;

    /// The user's `PENDING` entry for `(facility, date)`, if any.
    async fn find_pending_waitlist_entry(
        &mut self,
        club_id: ClubId,
        facility_id: FacilityId,
        user_id: UserId,
        target_date: NaiveDate,
    ) -> StorageResult<Option<WaitlistEntry>>;

    /// Up to `limit` `PENDING` entries for `(facility, date)` in FIFO order.
    async fn next_pending_waitlist_entries(
        &mut self,
        club_id: ClubId,
        facility_id: FacilityId,
        target_date: NaiveDate,
        limit: u32,
    ) -> StorageResult<Vec<WaitlistEntry>>;

    /// Sets the status of a waitlist entry.
    async fn set_waitlist_status(
        &mut self,
        club_id: ClubId,
        id: WaitlistEntryId,
        status: WaitlistStatus,
    ) -> StorageResult<()>;

    /// Expires `PENDING`/`NOTIFIED` entries created before `cutoff`.
    async fn expire_waitlist_entries(
        &mut self,
        club_id: ClubId,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<u64>;

    // ── Payments ────────────────────────────────────────────────────────

    /// Inserts a payment record.
    async fn insert_payment(&mut self, payment: &Payment) -> StorageResult<()>;

    /// Loads a payment by id.
    async fn get_payment(&mut self, club_id: ClubId, id: PaymentId)
    -> StorageResult<Option<Payment>>;

    /// Resolves the local payment a webhook refers to and locks it.
    ///
    /// Webhooks arrive without tenant context, so this is the only lookup
    /// not scoped by a club: it matches `external_id` first, then falls back
    /// to the local id echoed back by the processor. Callers must check the
    /// returned record's `club_id` before touching anything else.
    async fn find_payment_for_webhook(
        &mut self,
        external_id: &str,
        local_reference: Option<PaymentId>,
    ) -> StorageResult<Option<Payment>>;

    /// Payments attached to `reference_id`, newest first.
    async fn payments_for_reference(
        &mut self,
        club_id: ClubId,
        reference_id: uuid::Uuid,
    ) -> StorageResult<Vec<Payment>>;

    /// Persists status, external id, method and `paid_at` of a payment.
    async fn update_payment(&mut self, payment: &Payment) -> StorageResult<()>;

    /// Claims the refund of a `COMPLETED` payment until `lease_until`.
    ///
    /// Returns `false` if the payment is not `COMPLETED` or another refund
    /// holds a claim that has not lapsed at `now`.
    async fn claim_refund(
        &mut self,
        club_id: ClubId,
        id: PaymentId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Drops a refund claim so the refund can be attempted again.
    async fn release_refund(&mut self, club_id: ClubId, id: PaymentId) -> StorageResult<()>;

    // ── Outbox ──────────────────────────────────────────────────────────

    /// Enqueues a notification.
    async fn enqueue(&mut self, message: &OutboxMessage) -> StorageResult<()>;

    /// Claims up to `limit` undelivered messages, oldest first.
    async fn claim_outbox(&mut self, club_id: ClubId, limit: u32)
    -> StorageResult<Vec<OutboxMessage>>;

    /// Marks a message delivered.
    async fn mark_delivered(
        &mut self,
        club_id: ClubId,
        id: OutboxId,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Records a failed delivery attempt.
    async fn mark_failed(&mut self, club_id: ClubId, id: OutboxId) -> StorageResult<()>;

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Commits every write made on this transaction.
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_serialization_failures_are_retryable() {
        assert!(StorageError::Serialization("40001".into()).is_retryable());
        assert!(!StorageError::Conflict("x".into()).is_retryable());
        assert!(!StorageError::Timeout.is_retryable());
    }
}
