//! Availability rendering: a facility's day split into fixed-size slots.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::booking::{Booking, windows_overlap};
use super::facility::MaintenanceTask;

/// Occupancy of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    /// Nothing overlaps the slot.
    Free,
    /// An active booking overlaps the slot.
    Booked,
    /// A scheduled or running maintenance task overlaps the slot.
    Maintenance,
}

/// A discretised interval of a facility's daily schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Slot {
    /// Slot start.
    pub start: DateTime<Utc>,
    /// Slot end (exclusive).
    pub end: DateTime<Utc>,
    /// Occupancy.
    pub status: SlotStatus,
}

/// Splits `[opening, closing)` on `date` into `slot_minutes` slots and colours
/// them from the given bookings and maintenance tasks.
///
/// Maintenance wins over bookings when both overlap a slot. Inactive
/// bookings and closed maintenance tasks are ignored. A trailing partial
/// slot is kept, ending at closing time.
#[must_use]
pub fn compute_availability(
    date: NaiveDate,
    opening: NaiveTime,
    closing: NaiveTime,
    slot_minutes: u32,
    bookings: &[Booking],
    maintenance: &[MaintenanceTask],
) -> Vec<Slot> {
    let day_start = date.and_time(opening).and_utc();
    let day_end = date.and_time(closing).and_utc();
    let step = Duration::minutes(i64::from(slot_minutes.max(1)));

    let mut slots = Vec::new();
    let mut cursor = day_start;
    while cursor < day_end {
        let end = (cursor + step).min(day_end);
        let status = if maintenance.iter().any(|m| m.blocks(cursor, end)) {
            SlotStatus::Maintenance
        } else if bookings
            .iter()
            .any(|b| b.is_active() && windows_overlap(b.start_time, b.end_time, cursor, end))
        {
            SlotStatus::Booked
        } else {
            SlotStatus::Free
        };
        slots.push(Slot {
            start: cursor,
            end,
            status,
        });
        cursor = end;
    }
    slots
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::facility::MaintenanceStatus;
    use crate::domain::{BookingId, BookingStatus, ClubId, FacilityId, UserId};
    use rust_decimal::Decimal;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap_or_else(|| panic!("valid date"))
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap_or_else(|| panic!("valid time"))
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        date().and_time(time(h, m)).and_utc()
    }

    fn booking(start: DateTime<Utc>, end: DateTime<Utc>, status: BookingStatus) -> Booking {
        Booking {
            id: BookingId::new(),
            club_id: ClubId::new(),
            user_id: UserId::new(),
            facility_id: FacilityId::new(),
            start_time: start,
            end_time: end,
            total_price: Decimal::ZERO,
            guest_details: vec![],
            status,
            payment_expiry: None,
            rule_id: None,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn splits_day_into_slots() {
        let slots = compute_availability(date(), time(8, 0), time(12, 0), 60, &[], &[]);
        assert_eq!(slots.len(), 4);
        assert!(slots.iter().all(|s| s.status == SlotStatus::Free));
    }

    #[test]
    fn colours_booked_and_maintenance() {
        let bookings = vec![
            booking(at(9, 0), at(10, 0), BookingStatus::Confirmed),
            booking(at(10, 0), at(11, 0), BookingStatus::Cancelled),
        ];
        let maintenance = vec![MaintenanceTask {
            facility_id: FacilityId::new(),
            start: at(11, 30),
            end: at(12, 0),
            status: MaintenanceStatus::Scheduled,
        }];
        let slots = compute_availability(date(), time(8, 0), time(12, 0), 60, &bookings, &maintenance);
        let statuses: Vec<SlotStatus> = slots.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                SlotStatus::Free,
                SlotStatus::Booked,
                SlotStatus::Free,
                SlotStatus::Maintenance
            ]
        );
    }

    #[test]
    fn trailing_partial_slot_ends_at_closing() {
        let slots = compute_availability(date(), time(8, 0), time(9, 30), 60, &[], &[]);
        assert_eq!(slots.len(), 2);
        let Some(last) = slots.last() else {
            panic!("expected slots");
        };
        assert_eq!(last.end, at(9, 30));
    }
}
