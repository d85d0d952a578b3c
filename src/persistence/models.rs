//! Database row models and their conversion into domain records.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

use super::StorageError;
use crate::domain::{
    Booking, Guest, Notification, OutboxMessage, Payment, RecurringRule, WaitlistEntry,
};

/// A row of the `bookings` table.
#[derive(Debug, Clone, FromRow)]
pub struct BookingRow {
    /// Booking id.
    pub id: Uuid,
    /// Tenant key.
    pub club_id: Uuid,
    /// Owner.
    pub user_id: Uuid,
    /// Facility.
    pub facility_id: Uuid,
    /// Window start.
    pub start_time: DateTime<Utc>,
    /// Window end.
    pub end_time: DateTime<Utc>,
    /// Price at creation.
    pub total_price: Decimal,
    /// JSONB array of guests.
    pub guest_details: Json<Vec<Guest>>,
    /// Status string.
    pub status: String,
    /// Payment deadline.
    pub payment_expiry: Option<DateTime<Utc>>,
    /// Source recurring rule.
    pub rule_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StorageError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            club_id: row.club_id.into(),
            user_id: row.user_id.into(),
            facility_id: row.facility_id.into(),
            start_time: row.start_time,
            end_time: row.end_time,
            total_price: row.total_price,
            guest_details: row.guest_details.0,
            status: row
                .status
                .parse()
                .map_err(|_| StorageError::Backend(format!("bad booking status {}", row.status)))?,
            payment_expiry: row.payment_expiry,
            rule_id: row.rule_id.map(Into::into),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row of the `recurring_rules` table.
#[derive(Debug, Clone, FromRow)]
pub struct RecurringRuleRow {
    /// Rule id.
    pub id: Uuid,
    /// Tenant key.
    pub club_id: Uuid,
    /// Facility.
    pub facility_id: Uuid,
    /// Rule type string.
    pub rule_type: String,
    /// 0 = Sunday.
    pub day_of_week: i16,
    /// Start time of day.
    pub start_time: NaiveTime,
    /// End time of day.
    pub end_time: NaiveTime,
    /// First date.
    pub start_date: NaiveDate,
    /// Last date.
    pub end_date: NaiveDate,
    /// Owner of materialised bookings.
    pub owner_id: Option<Uuid>,
    /// Group the rule serves.
    pub group_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<RecurringRuleRow> for RecurringRule {
    type Error = StorageError;

    fn try_from(row: RecurringRuleRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            club_id: row.club_id.into(),
            facility_id: row.facility_id.into(),
            rule_type: row
                .rule_type
                .parse()
                .map_err(|_| StorageError::Backend(format!("bad rule type {}", row.rule_type)))?,
            day_of_week: u8::try_from(row.day_of_week)
                .map_err(|_| StorageError::Backend(format!("bad weekday {}", row.day_of_week)))?,
            start_time: row.start_time,
            end_time: row.end_time,
            start_date: row.start_date,
            end_date: row.end_date,
            owner_id: row.owner_id.map(Into::into),
            group_id: row.group_id,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        })
    }
}

/// A row of the `waitlist_entries` table.
#[derive(Debug, Clone, FromRow)]
pub struct WaitlistRow {
    /// Entry id.
    pub id: Uuid,
    /// Tenant key.
    pub club_id: Uuid,
    /// Facility.
    pub resource_id: Uuid,
    /// Waiting user.
    pub user_id: Uuid,
    /// Wanted day.
    pub target_date: NaiveDate,
    /// Status string.
    pub status: String,
    /// Join timestamp.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<WaitlistRow> for WaitlistEntry {
    type Error = StorageError;

    fn try_from(row: WaitlistRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            club_id: row.club_id.into(),
            resource_id: row.resource_id.into(),
            user_id: row.user_id.into(),
            target_date: row.target_date,
            status: row
                .status
                .parse()
                .map_err(|e: crate::error::BookingError| StorageError::Backend(e.to_string()))?,
            created_at: row.created_at,
        })
    }
}

/// A row of the `payments` table.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    /// Payment id.
    pub id: Uuid,
    /// Tenant key.
    pub club_id: Uuid,
    /// Paid entity.
    pub reference_id: Uuid,
    /// Paid entity kind.
    pub reference_type: String,
    /// Amount.
    pub amount: Decimal,
    /// Currency code.
    pub currency: String,
    /// Status string.
    pub status: String,
    /// Processor id, empty until known.
    pub external_id: String,
    /// Payer.
    pub payer_id: Uuid,
    /// Method.
    pub method: String,
    /// Settlement timestamp.
    pub paid_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StorageError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let backend = |e: crate::error::BookingError| StorageError::Backend(e.to_string());
        Ok(Self {
            id: row.id.into(),
            club_id: row.club_id.into(),
            reference_id: row.reference_id,
            reference_type: row.reference_type.parse().map_err(backend)?,
            amount: row.amount,
            currency: row.currency,
            status: row.status.parse().map_err(backend)?,
            external_id: row.external_id,
            payer_id: row.payer_id.into(),
            method: row.method,
            paid_at: row.paid_at,
            created_at: row.created_at,
        })
    }
}

/// A row of the `outbox` table.
#[derive(Debug, Clone, FromRow)]
pub struct OutboxRow {
    /// Message id.
    pub id: Uuid,
    /// Tenant key.
    pub club_id: Uuid,
    /// Recipient.
    pub recipient: Uuid,
    /// JSONB payload.
    pub payload: Json<Notification>,
    /// Enqueue timestamp.
    pub created_at: DateTime<Utc>,
    /// Failed attempts.
    pub attempts: i32,
    /// Delivery timestamp.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl From<OutboxRow> for OutboxMessage {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id.into(),
            club_id: row.club_id.into(),
            recipient: row.recipient.into(),
            notification: row.payload.0,
            created_at: row.created_at,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            delivered_at: row.delivered_at,
        }
    }
}
