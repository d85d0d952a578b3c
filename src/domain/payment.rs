//! The engine's narrow view of payment records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ClubId, PaymentId, UserId};
use crate::error::BookingError;

/// Normalised payment status, independent of the processor's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Checkout created, not settled.
    Pending,
    /// Approved and settled.
    Completed,
    /// Rejected by the processor.
    Failed,
    /// Money returned to the payer.
    Refunded,
    /// Abandoned or voided.
    Cancelled,
}

impl PaymentStatus {
    /// Returns the wire / database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "REFUNDED" => Ok(Self::Refunded),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(BookingError::Internal(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

/// What a payment pays for. Selects the responder a webhook is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    /// A facility booking.
    Booking,
    /// A membership fee (handled outside the engine).
    Membership,
}

impl ReferenceType {
    /// Returns the wire / database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Booking => "BOOKING",
            Self::Membership => "MEMBERSHIP",
        }
    }
}

impl FromStr for ReferenceType {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BOOKING" => Ok(Self::Booking),
            "MEMBERSHIP" => Ok(Self::Membership),
            other => Err(BookingError::Internal(format!(
                "unknown reference type: {other}"
            ))),
        }
    }
}

/// Local payment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Local identifier.
    pub id: PaymentId,
    /// Owning club.
    pub club_id: ClubId,
    /// Id of the paid entity (a booking id for [`ReferenceType::Booking`]).
    pub reference_id: uuid::Uuid,
    /// Kind of the paid entity.
    pub reference_type: ReferenceType,
    /// Amount charged.
    pub amount: Decimal,
    /// ISO-4217 currency code.
    pub currency: String,
    /// Current status.
    pub status: PaymentStatus,
    /// Processor-assigned id; empty until the processor reports one.
    pub external_id: String,
    /// Paying user.
    pub payer_id: UserId,
    /// Payment method reported by the processor.
    pub method: String,
    /// Settlement timestamp.
    pub paid_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Payment as reported by the processor after normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPayment {
    /// Processor-assigned id.
    pub external_id: String,
    /// Our payment id, echoed back via the checkout's external reference.
    pub local_reference: Option<PaymentId>,
    /// Normalised status.
    pub status: PaymentStatus,
    /// Method reported by the processor.
    pub method: String,
    /// Settlement timestamp.
    pub paid_at: Option<DateTime<Utc>>,
}
