//! Booking record, its lifecycle state machine and pricing rule.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{BookingId, ClubId, FacilityId, RuleId, UserId};
use crate::error::BookingError;

/// Lifecycle status of a booking.
///
/// ```text
/// PENDING_PAYMENT ──approved──► CONFIRMED ──cancel──► CANCELLED
///       │  └──cancel/rejected──► CANCELLED    └──end + grace──► COMPLETED
///       └──expiry──► EXPIRED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Waiting for the payment processor to approve the checkout.
    PendingPayment,
    /// Paid (or free) and holding the slot.
    Confirmed,
    /// Cancelled by the owner, an admin, or a rejected payment. Terminal.
    Cancelled,
    /// Payment window elapsed. Terminal.
    Expired,
    /// A confirmed booking whose window is in the past. Terminal.
    Completed,
}

impl BookingStatus {
    /// Statuses that consume a slot.
    pub const ACTIVE: [Self; 2] = [Self::PendingPayment, Self::Confirmed];

    /// Returns the wire / database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
            Self::Completed => "COMPLETED",
        }
    }

    /// Returns `true` if a booking in this status blocks its window.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::PendingPayment | Self::Confirmed)
    }

    /// Returns `true` if `self → next` is an edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::PendingPayment,
                Self::Confirmed | Self::Cancelled | Self::Expired
            ) | (Self::Confirmed, Self::Cancelled | Self::Completed)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING_PAYMENT" => Ok(Self::PendingPayment),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXPIRED" => Ok(Self::Expired),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(BookingError::InvalidInput(format!(
                "unknown booking status: {other}"
            ))),
        }
    }
}

/// A guest brought along by the booking owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Guest {
    /// Guest full name.
    pub name: String,
    /// National identity document number.
    pub dni: String,
    /// Fee charged for this guest, fixed at creation time.
    #[schema(value_type = String)]
    pub fee_amount: Decimal,
}

/// A reservation of a facility for the half-open window `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Booking {
    /// Booking identifier.
    #[schema(value_type = uuid::Uuid)]
    pub id: BookingId,
    /// Owning club. Immutable after creation.
    #[schema(value_type = uuid::Uuid)]
    pub club_id: ClubId,
    /// Booking owner.
    #[schema(value_type = uuid::Uuid)]
    pub user_id: UserId,
    /// Reserved facility.
    #[schema(value_type = uuid::Uuid)]
    pub facility_id: FacilityId,
    /// Inclusive start of the window.
    pub start_time: DateTime<Utc>,
    /// Exclusive end of the window.
    pub end_time: DateTime<Utc>,
    /// Price computed once at creation.
    #[schema(value_type = String)]
    pub total_price: Decimal,
    /// Guests in the order they were submitted.
    pub guest_details: Vec<Guest>,
    /// Current lifecycle status.
    pub status: BookingStatus,
    /// Set iff `status == PENDING_PAYMENT`.
    pub payment_expiry: Option<DateTime<Utc>>,
    /// Recurring rule this booking was materialised from, if any.
    #[schema(value_type = Option<uuid::Uuid>)]
    pub rule_id: Option<RuleId>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Returns `true` if this booking holds its slot.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Returns `true` if this booking's window overlaps `[start, end)`.
    #[must_use]
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        windows_overlap(self.start_time, self.end_time, start, end)
    }

    /// Moves the booking to `next`, keeping `payment_expiry` consistent.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidState`] if the transition is not an
    /// edge of the state machine.
    pub fn transition(&mut self, next: BookingStatus, now: DateTime<Utc>) -> Result<(), BookingError> {
        if !self.status.can_transition_to(next) {
            return Err(BookingError::InvalidState(format!(
                "booking {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        if next != BookingStatus::PendingPayment {
            self.payment_expiry = None;
        }
        Ok(())
    }
}

/// Half-open overlap: touching windows do not overlap.
#[must_use]
pub fn windows_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// `hours(end − start) × hourly_rate + guest_fee × guests`, rounded to cents.
///
/// Fractional hours are computed from whole minutes in decimal arithmetic.
#[must_use]
pub fn compute_total_price(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    hourly_rate: Decimal,
    guest_fees: &[Decimal],
) -> Decimal {
    let seconds = Decimal::from((end - start).num_seconds().max(0));
    let hours = seconds / Decimal::from(3600);
    let guests: Decimal = guest_fees.iter().copied().sum();
    (hours * hourly_rate + guests).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0)
            .single()
            .unwrap_or_else(|| panic!("valid timestamp"))
    }

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            id: BookingId::new(),
            club_id: ClubId::new(),
            user_id: UserId::new(),
            facility_id: FacilityId::new(),
            start_time: at(10, 0),
            end_time: at(11, 0),
            total_price: dec!(100),
            guest_details: vec![],
            status,
            payment_expiry: Some(at(9, 30)),
            rule_id: None,
            created_at: at(9, 0),
            updated_at: at(9, 0),
        }
    }

    #[test]
    fn touching_windows_do_not_overlap() {
        assert!(!windows_overlap(at(10, 0), at(11, 0), at(11, 0), at(12, 0)));
        assert!(!windows_overlap(at(11, 0), at(12, 0), at(10, 0), at(11, 0)));
        assert!(windows_overlap(at(10, 0), at(11, 0), at(10, 30), at(11, 30)));
        assert!(windows_overlap(at(10, 0), at(12, 0), at(10, 30), at(11, 0)));
    }

    #[test]
    fn price_one_hour_no_guests() {
        assert_eq!(compute_total_price(at(10, 0), at(11, 0), dec!(100), &[]), dec!(100));
    }

    #[test]
    fn price_two_hours_with_two_guests() {
        let fees = [dec!(50), dec!(50)];
        assert_eq!(compute_total_price(at(10, 0), at(12, 0), dec!(100), &fees), dec!(300));
    }

    #[test]
    fn price_fractional_hours_rounds_to_cents() {
        assert_eq!(compute_total_price(at(10, 0), at(11, 30), dec!(100), &[]), dec!(150));
        assert_eq!(compute_total_price(at(10, 0), at(10, 20), dec!(100), &[]), dec!(33.33));
    }

    #[test]
    fn price_counts_every_second_of_the_window() {
        let end = at(11, 1) + chrono::Duration::seconds(30);
        assert_eq!(compute_total_price(at(10, 0), end, dec!(100), &[]), dec!(102.50));
    }

    #[test]
    fn state_machine_edges() {
        use BookingStatus::*;
        assert!(PendingPayment.can_transition_to(Confirmed));
        assert!(PendingPayment.can_transition_to(Expired));
        assert!(PendingPayment.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(!Confirmed.can_transition_to(Expired));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Expired.can_transition_to(Confirmed));
        assert!(!Completed.can_transition_to(Cancelled));
    }

    #[test]
    fn transition_clears_payment_expiry() {
        let mut b = booking(BookingStatus::PendingPayment);
        let Ok(()) = b.transition(BookingStatus::Confirmed, at(9, 10)) else {
            panic!("pending → confirmed is allowed");
        };
        assert_eq!(b.status, BookingStatus::Confirmed);
        assert!(b.payment_expiry.is_none());
        assert_eq!(b.updated_at, at(9, 10));
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut b = booking(BookingStatus::Cancelled);
        let result = b.transition(BookingStatus::Confirmed, at(9, 10));
        assert!(matches!(result, Err(BookingError::InvalidState(_))));
        assert_eq!(b.status, BookingStatus::Cancelled);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert!(matches!("confirmed".parse::<BookingStatus>(), Ok(BookingStatus::Confirmed)));
        assert!("bogus".parse::<BookingStatus>().is_err());
    }
}
