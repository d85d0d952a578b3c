//! PostgreSQL implementation of the persistence layer.
//!
//! Every unit of work runs at `SERIALIZABLE`. Admissions additionally take a
//! transaction-scoped advisory lock on `(facility, day of start)` so racing
//! creates on the same facility queue up instead of aborting each other; the
//! exclusion constraint on `bookings` is the last line of defence.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::models::{BookingRow, OutboxRow, PaymentRow, RecurringRuleRow, WaitlistRow};
use super::{BookingFilter, Storage, StorageError, StorageResult, StorageTx, scoped};
use crate::config::DatabaseConfig;
use crate::domain::{
    Booking, BookingId, ClubId, FacilityId, OutboxId, OutboxMessage, Payment, PaymentId,
    PaymentStatus, RecurringRule, RuleId, UserId, WaitlistEntry, WaitlistEntryId, WaitlistStatus,
};

const BOOKING_COLUMNS: &str = "id, club_id, user_id, facility_id, start_time, end_time, \
     total_price, guest_details, status, payment_expiry, rule_id, created_at, updated_at";

const RULE_COLUMNS: &str = "id, club_id, facility_id, rule_type, day_of_week, start_time, \
     end_time, start_date, end_date, owner_id, group_id, created_at, deleted_at";

const WAITLIST_COLUMNS: &str = "id, club_id, resource_id, user_id, target_date, status, created_at";

const PAYMENT_COLUMNS: &str = "id, club_id, reference_id, reference_type, amount, currency, \
     status, external_id, payer_id, method, paid_at, created_at";

/// Maps a driver error onto the storage taxonomy by SQLSTATE.
fn map_err(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("40001" | "40P01") => StorageError::Serialization(db.message().to_string()),
            Some("23505" | "23P01") => StorageError::Conflict(
                db.constraint().unwrap_or("unique constraint").to_string(),
            ),
            _ => StorageError::Backend(err.to_string()),
        },
        sqlx::Error::PoolTimedOut => StorageError::Timeout,
        _ => StorageError::Backend(err.to_string()),
    }
}

fn require_one(rows_affected: u64, what: impl FnOnce() -> String) -> StorageResult<()> {
    if rows_affected == 0 {
        return Err(StorageError::NotFound(what()));
    }
    Ok(())
}

/// PostgreSQL-backed [`Storage`] using a `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Wraps an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool sized by `config` and runs the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError::Backend`] if the database is unreachable or
    /// a migration fails.
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(map_err)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Backend(format!("migration failed: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Returns the underlying pool, shared with the catalogue adapter.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn begin(&self) -> StorageResult<Box<dyn StorageTx>> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_err)?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn fetch_bookings(
        &mut self,
        sql: &str,
        club_id: ClubId,
        at: DateTime<Utc>,
    ) -> StorageResult<Vec<Booking>> {
        sqlx::query_as::<_, BookingRow>(sql)
            .bind(club_id.as_uuid())
            .bind(at)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_err)?
            .into_iter()
            .map(Booking::try_from)
            .collect()
    }

    async fn fetch_payment(&mut self, sql: &str, key: Uuid) -> StorageResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_err)?
            .map(Payment::try_from)
            .transpose()
    }
}

#[async_trait]
impl StorageTx for PgTx {
    async fn lock_facility_window(
        &mut self,
        club_id: ClubId,
        facility_id: FacilityId,
        start: DateTime<Utc>,
    ) -> StorageResult<()> {
        scoped(club_id)?;
        let key = format!("{club_id}:{facility_id}:{}", start.date_naive());
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn find_overlapping_bookings(
        &mut self,
        club_id: ClubId,
        facility_id: FacilityId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<Booking>> {
        scoped(club_id)?;
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE club_id = $1 AND facility_id = $2 \
             AND status IN ('PENDING_PAYMENT', 'CONFIRMED') \
             AND start_time < $4 AND end_time > $3 \
             ORDER BY start_time"
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(club_id.as_uuid())
            .bind(facility_id.as_uuid())
            .bind(start)
            .bind(end)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_err)?
            .into_iter()
            .map(Booking::try_from)
            .collect()
    }

    async fn insert_booking(&mut self, booking: &Booking) -> StorageResult<()> {
        scoped(booking.club_id)?;
        sqlx::query(
            "INSERT INTO bookings (id, club_id, user_id, facility_id, start_time, end_time, \
             total_price, guest_details, status, payment_expiry, rule_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.club_id.as_uuid())
        .bind(booking.user_id.as_uuid())
        .bind(booking.facility_id.as_uuid())
        .bind(booking.start_time)
        .bind(booking.end_time)
        .bind(booking.total_price)
        .bind(Json(&booking.guest_details))
        .bind(booking.status.as_str())
        .bind(booking.payment_expiry)
        .bind(booking.rule_id.map(|r| *r.as_uuid()))
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_booking(
        &mut self,
        club_id: ClubId,
        id: BookingId,
    ) -> StorageResult<Option<Booking>> {
        scoped(club_id)?;
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE club_id = $1 AND id = $2");
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(club_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_err)?
            .map(Booking::try_from)
            .transpose()
    }

    async fn update_booking(&mut self, booking: &Booking) -> StorageResult<()> {
        scoped(booking.club_id)?;
        let result = sqlx::query(
            "UPDATE bookings SET status = $3, payment_expiry = $4, updated_at = $5 \
             WHERE club_id = $1 AND id = $2",
        )
        .bind(booking.club_id.as_uuid())
        .bind(booking.id.as_uuid())
        .bind(booking.status.as_str())
        .bind(booking.payment_expiry)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        require_one(result.rows_affected(), || format!("booking {}", booking.id))
    }

    async fn list_bookings(
        &mut self,
        club_id: ClubId,
        filter: &BookingFilter,
    ) -> StorageResult<Vec<Booking>> {
        scoped(club_id)?;
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE club_id = $1 \
             AND ($2::uuid IS NULL OR user_id = $2) \
             AND ($3::uuid IS NULL OR facility_id = $3) \
             AND ($4::text IS NULL OR status = $4) \
             AND ($5::timestamptz IS NULL OR end_time > $5) \
             AND ($6::timestamptz IS NULL OR start_time < $6) \
             ORDER BY start_time, id"
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(club_id.as_uuid())
            .bind(filter.user_id.map(|u| *u.as_uuid()))
            .bind(filter.facility_id.map(|f| *f.as_uuid()))
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_err)?
            .into_iter()
            .map(Booking::try_from)
            .collect()
    }

    async fn bookings_due_for_expiry(
        &mut self,
        club_id: ClubId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Booking>> {
        scoped(club_id)?;
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE club_id = $1 \
             AND status = 'PENDING_PAYMENT' AND payment_expiry < $2 \
             ORDER BY payment_expiry FOR UPDATE"
        );
        self.fetch_bookings(&sql, club_id, now).await
    }

    async fn bookings_due_for_completion(
        &mut self,
        club_id: ClubId,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<Booking>> {
        scoped(club_id)?;
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE club_id = $1 \
             AND status = 'CONFIRMED' AND end_time < $2 \
             ORDER BY end_time FOR UPDATE"
        );
        self.fetch_bookings(&sql, club_id, cutoff).await
    }

    async fn rule_instance_exists(
        &mut self,
        club_id: ClubId,
        rule_id: RuleId,
        start: DateTime<Utc>,
    ) -> StorageResult<bool> {
        scoped(club_id)?;
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM bookings WHERE club_id = $1 AND rule_id = $2 \
             AND start_time = $3 AND status IN ('PENDING_PAYMENT', 'CONFIRMED', 'COMPLETED'))",
        )
        .bind(club_id.as_uuid())
        .bind(rule_id.as_uuid())
        .bind(start)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_err)
    }

    async fn insert_rule(&mut self, rule: &RecurringRule) -> StorageResult<()> {
        scoped(rule.club_id)?;
        sqlx::query(
            "INSERT INTO recurring_rules (id, club_id, facility_id, rule_type, day_of_week, \
             start_time, end_time, start_date, end_date, owner_id, group_id, created_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(rule.id.as_uuid())
        .bind(rule.club_id.as_uuid())
        .bind(rule.facility_id.as_uuid())
        .bind(rule.rule_type.as_str())
        .bind(i16::from(rule.day_of_week))
        .bind(rule.start_time)
        .bind(rule.end_time)
        .bind(rule.start_date)
        .bind(rule.end_date)
        .bind(rule.owner_id.map(|u| *u.as_uuid()))
        .bind(rule.group_id)
        .bind(rule.created_at)
        .bind(rule.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_rule(
        &mut self,
        club_id: ClubId,
        id: RuleId,
    ) -> StorageResult<Option<RecurringRule>> {
        scoped(club_id)?;
        let sql =
            format!("SELECT {RULE_COLUMNS} FROM recurring_rules WHERE club_id = $1 AND id = $2");
        sqlx::query_as::<_, RecurringRuleRow>(&sql)
            .bind(club_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_err)?
            .map(RecurringRule::try_from)
            .transpose()
    }

    async fn list_active_rules(
        &mut self,
        club_id: ClubId,
        today: NaiveDate,
    ) -> StorageResult<Vec<RecurringRule>> {
        scoped(club_id)?;
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM recurring_rules \
             WHERE club_id = $1 AND deleted_at IS NULL AND end_date >= $2 \
             ORDER BY created_at, id"
        );
        sqlx::query_as::<_, RecurringRuleRow>(&sql)
            .bind(club_id.as_uuid())
            .bind(today)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_err)?
            .into_iter()
            .map(RecurringRule::try_from)
            .collect()
    }

    async fn soft_delete_rule(
        &mut self,
        club_id: ClubId,
        id: RuleId,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        scoped(club_id)?;
        let result = sqlx::query(
            "UPDATE recurring_rules SET deleted_at = $3 \
             WHERE club_id = $1 AND id = $2 AND deleted_at IS NULL",
        )
        .bind(club_id.as_uuid())
        .bind(id.as_uuid())
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        require_one(result.rows_affected(), || format!("recurring rule {id}"))
    }

    async fn insert_waitlist_entry(&mut self, entry: &WaitlistEntry) -> StorageResult<()> {
        scoped(entry.club_id)?;
        sqlx::query(
            "INSERT INTO waitlist_entries (id, club_id, resource_id, user_id, target_date, \
             status, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id.as_uuid())
        .bind(entry.club_id.as_uuid())
        .bind(entry.resource_id.as_uuid())
        .bind(entry.user_id.as_uuid())
        .bind(entry.target_date)
        .bind(entry.status.as_str())
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
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
        let sql = format!(
            "SELECT {WAITLIST_COLUMNS} FROM waitlist_entries \
             WHERE club_id = $1 AND resource_id = $2 AND user_id = $3 AND target_date = $4 \
             AND status = 'PENDING' LIMIT 1"
        );
        sqlx::query_as::<_, WaitlistRow>(&sql)
            .bind(club_id.as_uuid())
            .bind(facility_id.as_uuid())
            .bind(user_id.as_uuid())
            .bind(target_date)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_err)?
            .map(WaitlistEntry::try_from)
            .transpose()
    }

    async fn next_pending_waitlist_entries(
        &mut self,
        club_id: ClubId,
        facility_id: FacilityId,
        target_date: NaiveDate,
        limit: u32,
    ) -> StorageResult<Vec<WaitlistEntry>> {
        scoped(club_id)?;
        let sql = format!(
            "SELECT {WAITLIST_COLUMNS} FROM waitlist_entries \
             WHERE club_id = $1 AND resource_id = $2 AND target_date = $3 \
             AND status = 'PENDING' ORDER BY created_at, id LIMIT $4 FOR UPDATE"
        );
        sqlx::query_as::<_, WaitlistRow>(&sql)
            .bind(club_id.as_uuid())
            .bind(facility_id.as_uuid())
            .bind(target_date)
            .bind(i64::from(limit))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_err)?
            .into_iter()
            .map(WaitlistEntry::try_from)
            .collect()
    }

    async fn set_waitlist_status(
        &mut self,
        club_id: ClubId,
        id: WaitlistEntryId,
        status: WaitlistStatus,
    ) -> StorageResult<()> {
        scoped(club_id)?;
        let result =
            sqlx::query("UPDATE waitlist_entries SET status = $3 WHERE club_id = $1 AND id = $2")
                .bind(club_id.as_uuid())
                .bind(id.as_uuid())
                .bind(status.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(map_err)?;
        require_one(result.rows_affected(), || format!("waitlist entry {id}"))
    }

    async fn expire_waitlist_entries(
        &mut self,
        club_id: ClubId,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<u64> {
        scoped(club_id)?;
        let result = sqlx::query(
            "UPDATE waitlist_entries SET status = 'EXPIRED' \
             WHERE club_id = $1 AND status IN ('PENDING', 'NOTIFIED') AND created_at < $2",
        )
        .bind(club_id.as_uuid())
        .bind(cutoff)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StorageResult<()> {
        scoped(payment.club_id)?;
        sqlx::query(
            "INSERT INTO payments (id, club_id, reference_id, reference_type, amount, currency, \
             status, external_id, payer_id, method, paid_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(payment.id.as_uuid())
        .bind(payment.club_id.as_uuid())
        .bind(payment.reference_id)
        .bind(payment.reference_type.as_str())
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.external_id)
        .bind(payment.payer_id.as_uuid())
        .bind(&payment.method)
        .bind(payment.paid_at)
        .bind(payment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get_payment(
        &mut self,
        club_id: ClubId,
        id: PaymentId,
    ) -> StorageResult<Option<Payment>> {
        scoped(club_id)?;
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE club_id = $1 AND id = $2");
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(club_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_err)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_payment_for_webhook(
        &mut self,
        external_id: &str,
        local_reference: Option<PaymentId>,
    ) -> StorageResult<Option<Payment>> {
        if !external_id.is_empty() {
            let sql = format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments WHERE external_id = $1 FOR UPDATE"
            );
            let found = sqlx::query_as::<_, PaymentRow>(&sql)
                .bind(external_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(map_err)?;
            if let Some(row) = found {
                return Payment::try_from(row).map(Some);
            }
        }
        let Some(local) = local_reference else {
            return Ok(None);
        };
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE");
        self.fetch_payment(&sql, *local.as_uuid()).await
    }

    async fn payments_for_reference(
        &mut self,
        club_id: ClubId,
        reference_id: Uuid,
    ) -> StorageResult<Vec<Payment>> {
        scoped(club_id)?;
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE club_id = $1 AND reference_id = $2 ORDER BY created_at DESC FOR UPDATE"
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(club_id.as_uuid())
            .bind(reference_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_err)?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }

    async fn update_payment(&mut self, payment: &Payment) -> StorageResult<()> {
        scoped(payment.club_id)?;
        let result = sqlx::query(
            "UPDATE payments SET status = $3, external_id = $4, method = $5, paid_at = $6 \
             WHERE club_id = $1 AND id = $2",
        )
        .bind(payment.club_id.as_uuid())
        .bind(payment.id.as_uuid())
        .bind(payment.status.as_str())
        .bind(&payment.external_id)
        .bind(&payment.method)
        .bind(payment.paid_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        require_one(result.rows_affected(), || format!("payment {}", payment.id))
    }

    async fn claim_refund(
        &mut self,
        club_id: ClubId,
        id: PaymentId,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> StorageResult<bool> {
        scoped(club_id)?;
        let result = sqlx::query(
            "UPDATE payments SET refund_claimed_until = $5 \
             WHERE club_id = $1 AND id = $2 AND status = $3 \
             AND (refund_claimed_until IS NULL OR refund_claimed_until <= $4)",
        )
        .bind(club_id.as_uuid())
        .bind(id.as_uuid())
        .bind(PaymentStatus::Completed.as_str())
        .bind(now)
        .bind(lease_until)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_refund(&mut self, club_id: ClubId, id: PaymentId) -> StorageResult<()> {
        scoped(club_id)?;
        sqlx::query(
            "UPDATE payments SET refund_claimed_until = NULL WHERE club_id = $1 AND id = $2",
        )
        .bind(club_id.as_uuid())
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn enqueue(&mut self, message: &OutboxMessage) -> StorageResult<()> {
        scoped(message.club_id)?;
        sqlx::query(
            "INSERT INTO outbox (id, club_id, recipient, payload, created_at, attempts, delivered_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(message.id.as_uuid())
        .bind(message.club_id.as_uuid())
        .bind(message.recipient.as_uuid())
        .bind(Json(&message.notification))
        .bind(message.created_at)
        .bind(i32::try_from(message.attempts).unwrap_or(i32::MAX))
        .bind(message.delivered_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn claim_outbox(
        &mut self,
        club_id: ClubId,
        limit: u32,
    ) -> StorageResult<Vec<OutboxMessage>> {
        scoped(club_id)?;
        let rows = sqlx::query_as::<_, OutboxRow>(
            "SELECT id, club_id, recipient, payload, created_at, attempts, delivered_at \
             FROM outbox WHERE club_id = $1 AND delivered_at IS NULL \
             ORDER BY created_at, id LIMIT $2 FOR UPDATE SKIP LOCKED",
        )
        .bind(club_id.as_uuid())
        .bind(i64::from(limit))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_err)?;
        Ok(rows.into_iter().map(OutboxMessage::from).collect())
    }

    async fn mark_delivered(
        &mut self,
        club_id: ClubId,
        id: OutboxId,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        scoped(club_id)?;
        let result =
            sqlx::query("UPDATE outbox SET delivered_at = $3 WHERE club_id = $1 AND id = $2")
                .bind(club_id.as_uuid())
                .bind(id.as_uuid())
                .bind(now)
                .execute(&mut *self.tx)
                .await
                .map_err(map_err)?;
        require_one(result.rows_affected(), || format!("outbox message {id}"))
    }

    async fn mark_failed(&mut self, club_id: ClubId, id: OutboxId) -> StorageResult<()> {
        scoped(club_id)?;
        let result = sqlx::query(
            "UPDATE outbox SET attempts = attempts + 1 WHERE club_id = $1 AND id = $2",
        )
        .bind(club_id.as_uuid())
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(map_err)?;
        require_one(result.rows_affected(), || format!("outbox message {id}"))
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx.commit().await.map_err(map_err)
    }
}
