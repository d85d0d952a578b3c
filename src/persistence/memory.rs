//! In-memory storage with serializable-by-construction transactions.
//!
//! A transaction holds the store's single [`tokio::sync::Mutex`] for its
//! whole lifetime and works on a private copy of the tables; commit swaps
//! the copy in. Concurrent transactions therefore run one after another,
//! which is the strongest isolation there is. Constraints enforced by the
//! PostgreSQL schema (active-window exclusion, recurring dedup, unique
//! external ids) are re-checked on insert so both backends reject the same
//! writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{BookingFilter, Storage, StorageError, StorageResult, StorageTx, scoped};
use crate::domain::{
    Booking, BookingId, BookingStatus, ClubId, FacilityId, OutboxId, OutboxMessage, Payment,
    PaymentId, PaymentStatus, RecurringRule, RuleId, UserId, WaitlistEntry, WaitlistEntryId,
    WaitlistStatus,
};

#[derive(Debug, Default, Clone)]
struct Tables {
    bookings: HashMap<BookingId, Booking>,
    rules: HashMap<RuleId, RecurringRule>,
    waitlist: HashMap<WaitlistEntryId, WaitlistEntry>,
    payments: HashMap<PaymentId, Payment>,
    refund_claims: HashMap<PaymentId, DateTime<Utc>>,
    outbox: Vec<OutboxMessage>,
}

/// Process-local [`Storage`] backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<Mutex<Tables>>,
    injected_failures: Arc<AtomicU32>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` commits fail with a serialization error, as a
    /// contended PostgreSQL would.
    pub fn fail_next_commits(&self, n: u32) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> StorageResult<Box<dyn StorageTx>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            injected_failures: Arc::clone(&self.injected_failures),
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    injected_failures: Arc<AtomicU32>,
}

fn blocks_dedup(status: BookingStatus) -> bool {
    matches!(
        status,
        BookingStatus::PendingPayment | BookingStatus::Confirmed | BookingStatus::Completed
    )
}

#[async_trait]
impl StorageTx for MemoryTx {
    async fn lock_facility_window(
        &mut self,
        club_id: ClubId,
        _facility_id: FacilityId,
        _start: DateTime<Utc>,
    ) -> StorageResult<()> {
        // The store-wide lock is already held.
        scoped(club_id)
    }

    async fn find_overlapping_bookings(
        &mut self,
        club_id: ClubId,
        facility_id: FacilityId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<Booking>> {
        scoped(club_id)?;
        Ok(self
            .working
            .bookings
            .values()
            .filter(|b| {
                b.club_id == club_id
                    && b.facility_id == facility_id
                    && b.is_active()
                    && b.overlaps(start, end)
            })
            .cloned()
            .collect())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> StorageResult<()> {
        scoped(booking.club_id)?;
        let clash = self.working.bookings.values().any(|b| {
            b.facility_id == booking.facility_id
                && ((b.is_active()
                    && booking.is_active()
                    && b.overlaps(booking.start_time, booking.end_time))
                    || (blocks_dedup(b.status)
                        && blocks_dedup(booking.status)
                        && b.start_time == booking.start_time))
        });
        if clash {
            return Err(StorageError::Conflict("bookings_active_window".to_string()));
        }
        self.working.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get_booking(
        &mut self,
        club_id: ClubId,
        id: BookingId,
    ) -> StorageResult<Option<Booking>> {
        scoped(club_id)?;
        Ok(self
            .working
            .bookings
            .get(&id)
            .filter(|b| b.club_id == club_id)
            .cloned())
    }

    async fn update_booking(&mut self, booking: &Booking) -> StorageResult<()> {
        scoped(booking.club_id)?;
        let row = self
            .working
            .bookings
            .get_mut(&booking.id)
            .filter(|b| b.club_id == booking.club_id)
            .ok_or_else(|| StorageError::NotFound(format!("booking {}", booking.id)))?;
        row.status = booking.status;
        row.payment_expiry = booking.payment_expiry;
        row.updated_at = booking.updated_at;
        Ok(())
    }

    async fn list_bookings(
        &mut self,
        club_id: ClubId,
        filter: &BookingFilter,
    ) -> StorageResult<Vec<Booking>> {
        scoped(club_id)?;
        let mut rows: Vec<Booking> = self
            .working
            .bookings
            .values()
            .filter(|b| b.club_id == club_id && filter.matches(b))
            .cloned()
            .collect();
        rows.sort_by_key(|b| (b.start_time, b.id));
        Ok(rows)
    }

    async fn bookings_due_for_expiry(
        &mut self,
        club_id: ClubId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Booking>> {
        scoped(club_id)?;
        Ok(self
            .working
            .bookings
            .values()
            .filter(|b| {
                b.club_id == club_id
                    && b.status == BookingStatus::PendingPayment
                    && b.payment_expiry.is_some_and(|e| e < now)
            })
            .cloned()
            .collect())
    }

    async fn bookings_due_for_completion(
        &mut self,
        club_id: ClubId,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<Booking>> {
        scoped(club_id)?;
        Ok(self
            .working
            .bookings
            .values()
            .filter(|b| {
                b.club_id == club_id && b.status == BookingStatus::Confirmed && b.end_time < cutoff
            })
            .cloned()
            .collect())
    }

    async fn rule_instance_exists(
        &mut self,
        club_id: ClubId,
        rule_id: RuleId,
        start: DateTime<Utc>,
    ) -> StorageResult<bool> {
        scoped(club_id)?;
        Ok(self.working.bookings.values().any(|b| {
            b.club_id == club_id
                && b.rule_id == Some(rule_id)
                && b.start_time == start
                && blocks_dedup(b.status)
        }))
    }

    async fn insert_rule(&mut self, rule: &RecurringRule) -> StorageResult<()> {
        scoped(rule.club_id)?;
        self.working.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn get_rule(
        &mut self,
        club_id: ClubId,
        id: RuleId,
    ) -> StorageResult<Option<RecurringRule>> {
        scoped(club_id)?;
        Ok(self
            .working
            .rules
            .get(&id)
            .filter(|r| r.club_id == club_id)
            .cloned())
    }

    async fn list_active_rules(
        &mut self,
        club_id: ClubId,
        today: NaiveDate,
    ) -> StorageResult<Vec<RecurringRule>> {
        scoped(club_id)?;
        let mut rules: Vec<RecurringRule> = self
            .working
            .rules
            .values()
            .filter(|r| r.club_id == club_id && r.is_active(today))
            .cloned()
            .collect();
        rules.sort_by_key(|r| (r.created_at, r.id));
        Ok(rules)
    }

    async fn soft_delete_rule(
        &mut self,
        club_id: ClubId,
        id: RuleId,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        scoped(club_id)?;
        let rule = self
            .working
            .rules
            .get_mut(&id)
            .filter(|r| r.club_id == club_id && r.deleted_at.is_none())
            .ok_or_else(|| StorageError::NotFound(format!("recurring rule {id}")))?;
        rule.deleted_at = Some(now);
        Ok(())
    }

    async fn insert_waitlist_entry(&mut self, entry: &WaitlistEntry) -> StorageResult<()> {
        scoped(entry.club_id)?;
        self.working.waitlist.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn find_pending_waitlist_entry(
        &mut self,
        club_id: ClubId,
        facility_id: FacilityId,
        user_id: UserId,
        target_date: NaiveDate,
    ) -> StorageResult<Option<WaitlistEntry>> {
        scoped(club_id)?;
        Ok(self
            .working
            .waitlist
            .values()
            .find(|e| {
                e.club_id == club_id
                    && e.resource_id == facility_id
                    && e.user_id == user_id
                    && e.target_date == target_date
                    && e.status == WaitlistStatus::Pending
            })
            .cloned())
    }

    async fn next_pending_waitlist_entries(
        &mut self,
        club_id: ClubId,
        facility_id: FacilityId,
        target_date: NaiveDate,
        limit: u32,
    ) -> StorageResult<Vec<WaitlistEntry>> {
        scoped(club_id)?;
        let mut entries: Vec<WaitlistEntry> = self
            .working
            .waitlist
            .values()
            .filter(|e| {
                e.club_id == club_id
                    && e.resource_id == facility_id
                    && e.target_date == target_date
                    && e.status == WaitlistStatus::Pending
            })
            .cloned()
            .collect();
        entries.sort_by_key(WaitlistEntry::queue_key);
        entries.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(entries)
    }

    async fn set_waitlist_status(
        &mut self,
        club_id: ClubId,
        id: WaitlistEntryId,
        status: WaitlistStatus,
    ) -> StorageResult<()> {
        scoped(club_id)?;
        let entry = self
            .working
            .waitlist
            .get_mut(&id)
            .filter(|e| e.club_id == club_id)
            .ok_or_else(|| StorageError::NotFound(format!("waitlist entry {id}")))?;
        entry.status = status;
        Ok(())
    }

    async fn expire_waitlist_entries(
        &mut self,
        club_id: ClubId,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<u64> {
        scoped(club_id)?;
        let mut expired = 0;
        for entry in self.working.waitlist.values_mut() {
            if entry.club_id == club_id
                && matches!(
                    entry.status,
                    WaitlistStatus::Pending | WaitlistStatus::Notified
                )
                && entry.created_at < cutoff
            {
                entry.status = WaitlistStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StorageResult<()> {
        scoped(payment.club_id)?;
        if !payment.external_id.is_empty()
            && self
                .working
                .payments
                .values()
                .any(|p| p.external_id == payment.external_id)
        {
            return Err(StorageError::Conflict("payments_external_id".to_string()));
        }
        self.working.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(
        &mut self,
        club_id: ClubId,
        id: PaymentId,
    ) -> StorageResult<Option<Payment>> {
        scoped(club_id)?;
        Ok(self
            .working
            .payments
            .get(&id)
            .filter(|p| p.club_id == club_id)
            .cloned())
    }

    async fn find_payment_for_webhook(
        &mut self,
        external_id: &str,
        local_reference: Option<PaymentId>,
    ) -> StorageResult<Option<Payment>> {
        let by_external = self
            .working
            .payments
            .values()
            .find(|p| !external_id.is_empty() && p.external_id == external_id);
        Ok(by_external
            .or_else(|| local_reference.and_then(|id| self.working.payments.get(&id)))
            .cloned())
    }

    async fn payments_for_reference(
        &mut self,
        club_id: ClubId,
        reference_id: uuid::Uuid,
    ) -> StorageResult<Vec<Payment>> {
        scoped(club_id)?;
        let mut rows: Vec<Payment> = self
            .working
            .payments
            .values()
            .filter(|p| p.club_id == club_id && p.reference_id == reference_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn update_payment(&mut self, payment: &Payment) -> StorageResult<()> {
        scoped(payment.club_id)?;
        if !payment.external_id.is_empty()
            && self
                .working
                .payments
                .values()
                .any(|p| p.id != payment.id && p.external_id == payment.external_id)
        {
            return Err(StorageError::Conflict("payments_external_id".to_string()));
        }
        let row = self
            .working
            .payments
            .get_mut(&payment.id)
            .filter(|p| p.club_id == payment.club_id)
            .ok_or_else(|| StorageError::NotFound(format!("payment {}", payment.id)))?;
        row.status = payment.status;
        row.external_id.clone_from(&payment.external_id);
        row.method.clone_from(&payment.method);
        row.paid_at = payment.paid_at;
        Ok(())
    }

    async fn claim_refund(
        &mut self,
        club_id: ClubId,
        id: PaymentId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<bool> {
        scoped(club_id)?;
        let refundable = self
            .working
            .payments
            .get(&id)
            .is_some_and(|p| p.club_id == club_id && p.status == PaymentStatus::Completed);
        let held = self
            .working
            .refund_claims
            .get(&id)
            .is_some_and(|until| *until > now);
        if !refundable || held {
            return Ok(false);
        }
        self.working.refund_claims.insert(id, lease_until);
        Ok(true)
    }

    async fn release_refund(&mut self, club_id: ClubId, id: PaymentId) -> StorageResult<()> {
        scoped(club_id)?;
        if self.working.payments.get(&id).is_some_and(|p| p.club_id == club_id) {
            self.working.refund_claims.remove(&id);
        }
        Ok(())
    }

    async fn enqueue(&mut self, message: &OutboxMessage) -> StorageResult<()> {
        scoped(message.club_id)?;
        self.working.outbox.push(message.clone());
        Ok(())
    }

    async fn claim_outbox(
        &mut self,
        club_id: ClubId,
        limit: u32,
    ) -> StorageResult<Vec<OutboxMessage>> {
        scoped(club_id)?;
        let mut pending: Vec<OutboxMessage> = self
            .working
            .outbox
            .iter()
            .filter(|m| m.club_id == club_id && m.delivered_at.is_none())
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.created_at);
        pending.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(pending)
    }

    async fn mark_delivered(
        &mut self,
        club_id: ClubId,
        id: OutboxId,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        scoped(club_id)?;
        let message = self
            .working
            .outbox
            .iter_mut()
            .find(|m| m.club_id == club_id && m.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("outbox message {id}")))?;
        message.delivered_at = Some(now);
        Ok(())
    }

    async fn mark_failed(&mut self, club_id: ClubId, id: OutboxId) -> StorageResult<()> {
        scoped(club_id)?;
        let message = self
            .working
            .outbox
            .iter_mut()
            .find(|m| m.club_id == club_id && m.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("outbox message {id}")))?;
        message.attempts = message.attempts.saturating_add(1);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StorageResult<()> {
        let pending = self.injected_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.injected_failures.store(pending - 1, Ordering::SeqCst);
            return Err(StorageError::Serialization(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }
        let working = std::mem::take(&mut self.working);
        *self.guard = working;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, 0, 0)
            .single()
            .unwrap_or_else(|| panic!("valid timestamp"))
    }

    fn booking(club_id: ClubId, facility_id: FacilityId, start: u32, end: u32) -> Booking {
        Booking {
            id: BookingId::new(),
            club_id,
            user_id: UserId::new(),
            facility_id,
            start_time: t(start),
            end_time: t(end),
            total_price: Decimal::ZERO,
            guest_details: vec![],
            status: BookingStatus::Confirmed,
            payment_expiry: None,
            rule_id: None,
            created_at: t(0),
            updated_at: t(0),
        }
    }

    async fn begin(store: &MemoryStorage) -> Box<dyn StorageTx> {
        let Ok(tx) = store.begin().await else {
            panic!("begin failed");
        };
        tx
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = MemoryStorage::new();
        let club = ClubId::new();
        let b = booking(club, FacilityId::new(), 10, 11);
        {
            let mut tx = begin(&store).await;
            assert!(tx.insert_booking(&b).await.is_ok());
        }
        let mut tx = begin(&store).await;
        let found = tx.get_booking(club, b.id).await;
        assert!(matches!(found, Ok(None)));
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = MemoryStorage::new();
        let club = ClubId::new();
        let b = booking(club, FacilityId::new(), 10, 11);
        let mut tx = begin(&store).await;
        assert!(tx.insert_booking(&b).await.is_ok());
        assert!(tx.commit().await.is_ok());

        let mut tx = begin(&store).await;
        let Ok(Some(found)) = tx.get_booking(club, b.id).await else {
            panic!("booking should be visible");
        };
        assert_eq!(found, b);
    }

    #[tokio::test]
    async fn other_tenant_cannot_read() {
        let store = MemoryStorage::new();
        let club = ClubId::new();
        let b = booking(club, FacilityId::new(), 10, 11);
        let mut tx = begin(&store).await;
        assert!(tx.insert_booking(&b).await.is_ok());
        assert!(matches!(tx.get_booking(ClubId::new(), b.id).await, Ok(None)));
    }

    #[tokio::test]
    async fn unscoped_query_fails_fast() {
        let store = MemoryStorage::new();
        let mut tx = begin(&store).await;
        let nil = ClubId::from_uuid(uuid::Uuid::nil());
        let result = tx.list_bookings(nil, &BookingFilter::default()).await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
    }

    #[tokio::test]
    async fn overlapping_active_insert_is_rejected() {
        let store = MemoryStorage::new();
        let club = ClubId::new();
        let facility = FacilityId::new();
        let mut tx = begin(&store).await;
        assert!(tx.insert_booking(&booking(club, facility, 10, 11)).await.is_ok());
        let clash = tx.insert_booking(&booking(club, facility, 10, 12)).await;
        assert!(matches!(clash, Err(StorageError::Conflict(_))));
        assert!(tx.insert_booking(&booking(club, facility, 11, 12)).await.is_ok());
    }

    #[tokio::test]
    async fn injected_failure_aborts_commit() {
        let store = MemoryStorage::new();
        store.fail_next_commits(1);
        let club = ClubId::new();
        let b = booking(club, FacilityId::new(), 10, 11);

        let mut tx = begin(&store).await;
        assert!(tx.insert_booking(&b).await.is_ok());
        assert!(matches!(tx.commit().await, Err(StorageError::Serialization(_))));

        let mut tx = begin(&store).await;
        assert!(matches!(tx.get_booking(club, b.id).await, Ok(None)));
        assert!(tx.insert_booking(&b).await.is_ok());
        assert!(tx.commit().await.is_ok());
    }

    #[tokio::test]
    async fn waitlist_fifo_order() {
        let store = MemoryStorage::new();
        let club = ClubId::new();
        let facility = FacilityId::new();
        let Some(day) = NaiveDate::from_ymd_opt(2025, 6, 1) else {
            panic!("valid date");
        };
        let mut tx = begin(&store).await;
        let mut ids = Vec::new();
        for offset in [2, 0, 1] {
            let entry = WaitlistEntry {
                id: WaitlistEntryId::new(),
                club_id: club,
                resource_id: facility,
                user_id: UserId::new(),
                target_date: day,
                status: WaitlistStatus::Pending,
                created_at: t(0) + Duration::minutes(offset),
            };
            ids.push((offset, entry.id));
            assert!(tx.insert_waitlist_entry(&entry).await.is_ok());
        }
        let Ok(next) = tx.next_pending_waitlist_entries(club, facility, day, 2).await else {
            panic!("query failed");
        };
        let got: Vec<WaitlistEntryId> = next.iter().map(|e| e.id).collect();
        ids.sort_by_key(|(offset, _)| *offset);
        let expected: Vec<WaitlistEntryId> = ids.iter().take(2).map(|(_, id)| *id).collect();
        assert_eq!(got, expected);
    }
}
