//! Notifications enqueued in the transactional outbox.
//!
//! Every state transition that a user should hear about produces a
//! [`Notification`] in the same storage transaction as the transition.
//! The outbox dispatcher delivers them after commit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{BookingId, ClubId, FacilityId, OutboxId, UserId};

/// User-facing notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Notification {
    /// A booking was created and waits for payment.
    BookingPendingPayment {
        /// Booking identifier.
        booking_id: BookingId,
        /// Amount due.
        total_price: Decimal,
        /// Deadline for paying.
        payment_expiry: DateTime<Utc>,
    },
    /// A booking holds its slot.
    BookingConfirmed {
        /// Booking identifier.
        booking_id: BookingId,
        /// Reserved facility.
        facility_id: FacilityId,
        /// Window start.
        start_time: DateTime<Utc>,
    },
    /// A booking was cancelled.
    BookingCancelled {
        /// Booking identifier.
        booking_id: BookingId,
        /// Whether a refund was requested.
        refund_due: bool,
    },
    /// A pending booking was not paid in time.
    BookingExpired {
        /// Booking identifier.
        booking_id: BookingId,
    },
    /// A waitlisted user was given a freed slot.
    WaitlistPromoted {
        /// The new pending booking.
        booking_id: BookingId,
        /// Facility of the freed slot.
        facility_id: FacilityId,
        /// Window start.
        start_time: DateTime<Utc>,
        /// Deadline for paying.
        payment_expiry: Option<DateTime<Utc>>,
    },
    /// The payment of a cancelled booking was refunded.
    RefundIssued {
        /// Booking identifier.
        booking_id: BookingId,
        /// Amount returned.
        amount: Decimal,
    },
}

impl Notification {
    /// Returns the booking this notification is about.
    #[must_use]
    pub fn booking_id(&self) -> BookingId {
        match self {
            Self::BookingPendingPayment { booking_id, .. }
            | Self::BookingConfirmed { booking_id, .. }
            | Self::BookingCancelled { booking_id, .. }
            | Self::BookingExpired { booking_id }
            | Self::WaitlistPromoted { booking_id, .. }
            | Self::RefundIssued { booking_id, .. } => *booking_id,
        }
    }

    /// Returns the notification type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::BookingPendingPayment { .. } => "booking_pending_payment",
            Self::BookingConfirmed { .. } => "booking_confirmed",
            Self::BookingCancelled { .. } => "booking_cancelled",
            Self::BookingExpired { .. } => "booking_expired",
            Self::WaitlistPromoted { .. } => "waitlist_promoted",
            Self::RefundIssued { .. } => "refund_issued",
        }
    }
}

/// A queued notification addressed to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Outbox row identifier.
    pub id: OutboxId,
    /// Owning club.
    pub club_id: ClubId,
    /// Recipient.
    pub recipient: UserId,
    /// Payload.
    pub notification: Notification,
    /// Enqueue timestamp; delivery order within a club.
    pub created_at: DateTime<Utc>,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    /// Set once delivered.
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// Builds an undelivered message.
    #[must_use]
    pub fn new(
        club_id: ClubId,
        recipient: UserId,
        notification: Notification,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutboxId::new(),
            club_id,
            recipient,
            notification,
            created_at: now,
            attempts: 0,
            delivered_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_type_tag() {
        let n = Notification::BookingExpired {
            booking_id: BookingId::new(),
        };
        let json = serde_json::to_string(&n).unwrap_or_default();
        assert!(json.contains("\"event_type\":\"booking_expired\""));
        assert_eq!(n.event_type_str(), "booking_expired");
    }

    #[test]
    fn booking_id_accessor() {
        let id = BookingId::new();
        let n = Notification::BookingCancelled {
            booking_id: id,
            refund_due: true,
        };
        assert_eq!(n.booking_id(), id);
    }
}
