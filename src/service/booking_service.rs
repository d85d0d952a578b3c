//! Booking orchestrator: admission, cancellation, waitlist promotion and
//! availability.
//!
//! Every mutation runs as one storage unit of work through
//! [`retry::run`]: the conflict check, the insert, the payment row and the
//! outbox rows commit together or not at all.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::payment_bridge::{PaymentBridge, settled_payment};
use super::retry::{self, TxError};
use crate::config::BookingPolicy;
use crate::domain::booking::compute_total_price;
use crate::domain::slot::compute_availability;
use crate::domain::{
    Booking, BookingId, BookingStatus, ClubId, Facility, FacilityId, Guest, Notification,
    OutboxMessage, Payment, PaymentStatus, Principal, RuleId, Slot, UserId, UserProfile,
    WaitlistEntry, WaitlistEntryId, WaitlistStatus,
};
use crate::error::{BookingError, ConflictCause};
use crate::persistence::{BookingFilter, Storage, StorageTx};
use crate::ports::{FacilityCatalog, PaymentResponder, UserDirectory};

/// A guest as submitted by the client. The fee comes from the facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestRequest {
    /// Guest full name.
    pub name: String,
    /// National identity document number.
    pub dni: String,
}

/// Input of [`BookingService::create_booking`].
#[derive(Debug, Clone)]
pub struct NewBooking {
    /// Facility to reserve.
    pub facility_id: FacilityId,
    /// Window start.
    pub start_time: DateTime<Utc>,
    /// Window end (exclusive).
    pub end_time: DateTime<Utc>,
    /// Guests brought by the owner.
    pub guests: Vec<GuestRequest>,
    /// Owner when an admin books on someone's behalf. Ignored for
    /// everyone else.
    pub owner_id: Option<UserId>,
}

/// A freshly admitted booking.
#[derive(Debug, Clone)]
pub struct CreatedBooking {
    /// The stored booking.
    pub booking: Booking,
    /// Where the owner pays, for priced bookings.
    pub checkout_url: Option<String>,
}

/// Optional constraints on booking listings.
#[derive(Debug, Clone, Default)]
pub struct BookingQuery {
    /// Only this facility.
    pub facility_id: Option<FacilityId>,
    /// Only this status.
    pub status: Option<BookingStatus>,
    /// Only bookings ending after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Only bookings starting before this instant.
    pub to: Option<DateTime<Utc>>,
}

/// Orchestrates the booking lifecycle.
#[derive(Debug, Clone)]
pub struct BookingService {
    storage: Arc<dyn Storage>,
    catalog: Arc<dyn FacilityCatalog>,
    users: Arc<dyn UserDirectory>,
    bridge: Arc<PaymentBridge>,
    policy: BookingPolicy,
}

impl BookingService {
    /// Creates a new `BookingService`.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        catalog: Arc<dyn FacilityCatalog>,
        users: Arc<dyn UserDirectory>,
        bridge: Arc<PaymentBridge>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            storage,
            catalog,
            users,
            bridge,
            policy,
        }
    }

    /// Returns the booking policy in force.
    #[must_use]
    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    /// Admits a booking for `principal`.
    ///
    /// Priced bookings are stored `PENDING_PAYMENT` together with a
    /// `PENDING` payment and come back with a checkout URL; free ones are
    /// `CONFIRMED` at once.
    ///
    /// # Errors
    ///
    /// Fails with `not_found`, `facility_inactive`, `invalid_input`,
    /// `medical_certificate_invalid`, `booking_conflict`, `gateway_error`
    /// or `internal`, checked in that order.
    pub async fn create_booking(
        &self,
        principal: &Principal,
        request: NewBooking,
    ) -> Result<CreatedBooking, BookingError> {
        self.admit(principal, request, None, Utc::now()).await
    }

    /// Shared admission path for clients and the recurring materialiser.
    ///
    /// Rule instances get their payment row but no checkout preference; the
    /// owner opens one through [`BookingService::checkout`].
    pub(crate) async fn admit(
        &self,
        principal: &Principal,
        request: NewBooking,
        rule_id: Option<RuleId>,
        now: DateTime<Utc>,
    ) -> Result<CreatedBooking, BookingError> {
        let club_id = principal.club_id;
        let owner_id = match request.owner_id {
            Some(owner) if principal.is_admin() => owner,
            _ => principal.user_id,
        };

        let facility = self.active_facility(club_id, request.facility_id).await?;
        check_window(&self.policy, request.start_time, request.end_time, now)?;
        let owner = if principal.is_system() {
            None
        } else {
            Some(self.eligible_owner(club_id, owner_id, request.start_time).await?)
        };

        let guests = request
            .guests
            .into_iter()
            .map(|g| guest(g, facility.guest_fee))
            .collect::<Result<Vec<_>, _>>()?;
        let fees: Vec<Decimal> = guests.iter().map(|g| g.fee_amount).collect();
        let total_price = compute_total_price(
            request.start_time,
            request.end_time,
            facility.hourly_rate,
            &fees,
        );
        let priced = !principal.is_system() && facility.is_priced(guests.len());

        let booking = Booking {
            id: BookingId::new(),
            club_id,
            user_id: owner_id,
            facility_id: facility.id,
            start_time: request.start_time,
            end_time: request.end_time,
            total_price,
            guest_details: guests,
            status: if priced {
                BookingStatus::PendingPayment
            } else {
                BookingStatus::Confirmed
            },
            payment_expiry: priced.then(|| now + self.policy.payment_expiry()),
            rule_id,
            created_at: now,
            updated_at: now,
        };
        let payment = priced.then(|| self.bridge.pending_payment(&booking, now));
        let open_checkout = payment.is_some() && rule_id.is_none();
        let mut deadline = self.policy.storage_timeout;
        if open_checkout {
            deadline += self.policy.gateway_timeout;
        }

        let (booking_ref, facility_ref, payment_ref) = (&booking, &facility, payment.as_ref());
        let email = owner.as_ref().map_or("", |u| u.email.as_str());
        let description = format!(
            "{} {}",
            facility.name,
            booking.start_time.format("%Y-%m-%d %H:%M")
        );
        let description = description.as_str();

        let checkout_url = retry::run(
            self.storage.as_ref(),
            deadline,
            "create_booking",
            move |mut tx| async move {
                self.insert_admitted(tx.as_mut(), facility_ref, booking_ref)
                    .await?;
                if let Some(payment) = payment_ref {
                    tx.insert_payment(payment).await?;
                }
                if let Some(message) = admission_message(booking_ref, now) {
                    tx.enqueue(&message).await?;
                }
                let url = match payment_ref {
                    Some(payment) if open_checkout => Some(
                        self.bridge
                            .create_checkout(payment, email, description)
                            .await?,
                    ),
                    _ => None,
                };
                tx.commit().await?;
                Ok(url)
            },
        )
        .await?;

        tracing::info!(
            %club_id,
            booking_id = %booking.id,
            facility_id = %booking.facility_id,
            status = booking.status.as_str(),
            total_price = %booking.total_price,
            "booking created"
        );
        Ok(CreatedBooking {
            booking,
            checkout_url,
        })
    }

    /// Lists the caller's own bookings.
    ///
    /// # Errors
    ///
    /// Returns `internal` on storage failure.
    pub async fn list_own_bookings(
        &self,
        principal: &Principal,
        query: BookingQuery,
    ) -> Result<Vec<Booking>, BookingError> {
        let filter = BookingFilter {
            user_id: Some(principal.user_id),
            facility_id: query.facility_id,
            status: query.status,
            from: query.from,
            to: query.to,
        };
        self.list(principal.club_id, &filter).await
    }

    /// Lists every booking of the caller's club.
    ///
    /// # Errors
    ///
    /// Returns `forbidden` for non-admins.
    pub async fn list_all_bookings(
        &self,
        principal: &Principal,
        query: BookingQuery,
    ) -> Result<Vec<Booking>, BookingError> {
        require_admin(principal)?;
        let filter = BookingFilter {
            user_id: None,
            facility_id: query.facility_id,
            status: query.status,
            from: query.from,
            to: query.to,
        };
        self.list(principal.club_id, &filter).await
    }

    async fn list(
        &self,
        club_id: ClubId,
        filter: &BookingFilter,
    ) -> Result<Vec<Booking>, BookingError> {
        retry::run(
            self.storage.as_ref(),
            self.policy.storage_timeout,
            "list_bookings",
            move |mut tx| async move { Ok(tx.list_bookings(club_id, filter).await?) },
        )
        .await
    }

    /// Loads one booking visible to the caller.
    ///
    /// # Errors
    ///
    /// Returns `not_found` if absent from the caller's club and `forbidden`
    /// if it belongs to someone else and the caller is not an admin.
    pub async fn get_booking(
        &self,
        principal: &Principal,
        id: BookingId,
    ) -> Result<Booking, BookingError> {
        let club_id = principal.club_id;
        let booking = retry::run(
            self.storage.as_ref(),
            self.policy.storage_timeout,
            "get_booking",
            move |mut tx| async move { Ok(tx.get_booking(club_id, id).await?) },
        )
        .await?
        .ok_or_else(|| BookingError::NotFound(format!("booking {id}")))?;
        require_owner_or_admin(principal, &booking)?;
        Ok(booking)
    }

    /// Cancels an active booking and hands its slot to the waitlist.
    ///
    /// A confirmed booking cancelled at least the refund window ahead of its
    /// start has its settled payment refunded after commit. Refund failures
    /// are logged and do not undo the cancellation.
    ///
    /// # Errors
    ///
    /// Returns `not_found`, `forbidden` for someone else's booking, or
    /// `invalid_state` unless the booking is pending or confirmed.
    pub async fn cancel_booking(
        &self,
        principal: &Principal,
        id: BookingId,
    ) -> Result<Booking, BookingError> {
        let now = Utc::now();
        let club_id = principal.club_id;
        let (booking, refundable) = retry::run(
            self.storage.as_ref(),
            self.policy.storage_timeout,
            "cancel_booking",
            move |mut tx| async move {
                let Some(mut booking) = tx.get_booking(club_id, id).await? else {
                    return Err(BookingError::NotFound(format!("booking {id}")).into());
                };
                require_owner_or_admin(principal, &booking)?;
                if !booking.is_active() {
                    return Err(BookingError::InvalidState(format!(
                        "booking {id} is {} and cannot be cancelled",
                        booking.status
                    ))
                    .into());
                }

                let was_confirmed = booking.status == BookingStatus::Confirmed;
                booking.transition(BookingStatus::Cancelled, now)?;
                tx.update_booking(&booking).await?;

                let payments = tx
                    .payments_for_reference(club_id, *booking.id.as_uuid())
                    .await?;
                let refundable = if was_confirmed {
                    payments
                        .iter()
                        .find(|p| p.status == PaymentStatus::Completed)
                        .filter(|_| booking.start_time - now >= self.policy.refund_window())
                        .cloned()
                } else {
                    cancel_pending_payments(tx.as_mut(), payments).await?;
                    None
                };

                if !is_system_owned(&booking) {
                    let notification = Notification::BookingCancelled {
                        booking_id: booking.id,
                        refund_due: refundable.is_some(),
                    };
                    tx.enqueue(&OutboxMessage::new(club_id, booking.user_id, notification, now))
                        .await?;
                }

                self.promote_next_waitlisted(tx.as_mut(), &booking, now)
                    .await?;
                tx.commit().await?;
                Ok((booking, refundable))
            },
        )
        .await?;

        tracing::info!(
            %club_id,
            booking_id = %booking.id,
            status = booking.status.as_str(),
            refund_due = refundable.is_some(),
            "booking cancelled"
        );

        if let Some(payment) = refundable {
            if let Err(err) = self.bridge.refund(&payment, now).await {
                tracing::warn!(
                    %club_id,
                    booking_id = %booking.id,
                    error = %err,
                    "refund after cancellation failed"
                );
            }
        }
        Ok(booking)
    }

    /// Refunds the settled payment of a cancelled booking on an admin's
    /// request, e.g. after an automatic refund failed.
    ///
    /// # Errors
    ///
    /// Returns `forbidden` for non-admins, `invalid_state` unless the booking
    /// is cancelled, `not_found` without a settled payment, or
    /// `gateway_error` if the processor keeps failing.
    pub async fn refund_booking(
        &self,
        principal: &Principal,
        id: BookingId,
    ) -> Result<(), BookingError> {
        require_admin(principal)?;
        let club_id = principal.club_id;
        let (booking, payments) = retry::run(
            self.storage.as_ref(),
            self.policy.storage_timeout,
            "load_refund",
            move |mut tx| async move {
                let Some(booking) = tx.get_booking(club_id, id).await? else {
                    return Err(BookingError::NotFound(format!("booking {id}")).into());
                };
                let payments = tx.payments_for_reference(club_id, *id.as_uuid()).await?;
                Ok((booking, payments))
            },
        )
        .await?;

        if booking.status != BookingStatus::Cancelled {
            return Err(BookingError::InvalidState(format!(
                "booking {id} is {}; only cancelled bookings are refunded",
                booking.status
            )));
        }
        let payment = settled_payment(payments)
            .ok_or_else(|| BookingError::NotFound(format!("settled payment for booking {id}")))?;
        self.bridge.refund(&payment, Utc::now()).await
    }

    /// Opens a checkout for the caller's booking that is still waiting for
    /// payment, typically one handed over by the waitlist.
    ///
    /// # Errors
    ///
    /// Returns `not_found`, `forbidden`, `invalid_state` unless the booking
    /// is `PENDING_PAYMENT`, or `gateway_error`.
    pub async fn checkout(
        &self,
        principal: &Principal,
        id: BookingId,
    ) -> Result<String, BookingError> {
        let club_id = principal.club_id;
        let (booking, payments) = retry::run(
            self.storage.as_ref(),
            self.policy.storage_timeout,
            "load_checkout",
            move |mut tx| async move {
                let Some(booking) = tx.get_booking(club_id, id).await? else {
                    return Err(BookingError::NotFound(format!("booking {id}")).into());
                };
                let payments = tx.payments_for_reference(club_id, *id.as_uuid()).await?;
                Ok((booking, payments))
            },
        )
        .await?;

        require_owner_or_admin(principal, &booking)?;
        if booking.status != BookingStatus::PendingPayment {
            return Err(BookingError::InvalidState(format!(
                "booking {id} is {} and needs no payment",
                booking.status
            )));
        }
        let payment = payments
            .into_iter()
            .find(|p| p.status == PaymentStatus::Pending)
            .ok_or_else(|| BookingError::NotFound(format!("pending payment for booking {id}")))?;
        let owner = self
            .users
            .get_user(club_id, booking.user_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("user {}", booking.user_id)))?;
        let facility = self
            .catalog
            .get_facility(club_id, booking.facility_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("facility {}", booking.facility_id)))?;
        let description = format!(
            "{} {}",
            facility.name,
            booking.start_time.format("%Y-%m-%d %H:%M")
        );
        self.bridge
            .create_checkout(&payment, &owner.email, &description)
            .await
    }

    /// Renders a facility's day as slots.
    ///
    /// # Errors
    ///
    /// Returns `not_found` for an unknown facility.
    pub async fn availability(
        &self,
        principal: &Principal,
        facility_id: FacilityId,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, BookingError> {
        let club_id = principal.club_id;
        let facility = self
            .catalog
            .get_facility(club_id, facility_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("facility {facility_id}")))?;
        let day_start = date.and_time(facility.opening_time).and_utc();
        let day_end = date.and_time(facility.closing_time).and_utc();

        let filter = BookingFilter {
            facility_id: Some(facility_id),
            from: Some(day_start),
            to: Some(day_end),
            ..BookingFilter::default()
        };
        let bookings = self.list(club_id, &filter).await?;
        let maintenance = self
            .catalog
            .list_maintenance(club_id, facility_id, day_start, day_end)
            .await?;

        Ok(compute_availability(
            date,
            facility.opening_time,
            facility.closing_time,
            self.policy.slot_duration_minutes,
            &bookings,
            &maintenance,
        ))
    }

    /// Queues the caller for a facility day. Joining twice returns the
    /// entry already waiting.
    ///
    /// # Errors
    ///
    /// Returns `not_found` for an unknown facility and `invalid_input` for a
    /// date in the past.
    pub async fn join_waitlist(
        &self,
        principal: &Principal,
        facility_id: FacilityId,
        target_date: NaiveDate,
    ) -> Result<WaitlistEntry, BookingError> {
        let now = Utc::now();
        let club_id = principal.club_id;
        let user_id = principal.user_id;
        if self
            .catalog
            .get_facility(club_id, facility_id)
            .await?
            .is_none()
        {
            return Err(BookingError::NotFound(format!("facility {facility_id}")));
        }
        if target_date < now.date_naive() {
            return Err(BookingError::InvalidInput(
                "target_date must not be in the past".to_string(),
            ));
        }

        let (entry, created) = retry::run(
            self.storage.as_ref(),
            self.policy.storage_timeout,
            "join_waitlist",
            move |mut tx| async move {
                if let Some(existing) = tx
                    .find_pending_waitlist_entry(club_id, facility_id, user_id, target_date)
                    .await?
                {
                    return Ok((existing, false));
                }
                let entry = WaitlistEntry {
                    id: WaitlistEntryId::new(),
                    club_id,
                    resource_id: facility_id,
                    user_id,
                    target_date,
                    status: WaitlistStatus::Pending,
                    created_at: now,
                };
                tx.insert_waitlist_entry(&entry).await?;
                tx.commit().await?;
                Ok((entry, true))
            },
        )
        .await?;

        if created {
            tracing::info!(
                %club_id,
                entry_id = %entry.id,
                %facility_id,
                %target_date,
                "joined waitlist"
            );
        }
        Ok(entry)
    }

    /// Gives a freed slot to the first eligible waitlisted user, inside the
    /// freeing transaction.
    ///
    /// Candidates that cannot book (unknown user, invalid certificate) are
    /// expired and the next one is tried, up to the configured bound. When
    /// the slot itself is no longer bookable the queue is left untouched.
    pub(crate) async fn promote_next_waitlisted(
        &self,
        tx: &mut dyn StorageTx,
        freed: &Booking,
        now: DateTime<Utc>,
    ) -> Result<Option<BookingId>, TxError> {
        let club_id = freed.club_id;
        let date = freed.start_time.date_naive();
        let candidates = tx
            .next_pending_waitlist_entries(
                club_id,
                freed.facility_id,
                date,
                self.policy.waitlist_promotion_max_attempts,
            )
            .await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let facility = match self.catalog.get_facility(club_id, freed.facility_id).await? {
            Some(f) if f.is_active() => f,
            _ => {
                tracing::debug!(
                    %club_id,
                    facility_id = %freed.facility_id,
                    "facility not bookable, waitlist left as is"
                );
                return Ok(None);
            }
        };
        if let Err(err) = check_window(&self.policy, freed.start_time, freed.end_time, now) {
            tracing::debug!(%club_id, booking_id = %freed.id, error = %err, "freed slot no longer bookable");
            return Ok(None);
        }

        for entry in candidates {
            let eligible = self
                .users
                .get_user(club_id, entry.user_id)
                .await?
                .filter(|u| u.medical_certificate_valid_at(freed.start_time));
            if eligible.is_none() {
                tracing::debug!(
                    %club_id,
                    entry_id = %entry.id,
                    user_id = %entry.user_id,
                    "waitlist candidate not eligible, skipped"
                );
                tx.set_waitlist_status(club_id, entry.id, WaitlistStatus::Expired)
                    .await?;
                continue;
            }

            let priced = facility.is_priced(0);
            let booking = Booking {
                id: BookingId::new(),
                club_id,
                user_id: entry.user_id,
                facility_id: facility.id,
                start_time: freed.start_time,
                end_time: freed.end_time,
                total_price: compute_total_price(
                    freed.start_time,
                    freed.end_time,
                    facility.hourly_rate,
                    &[],
                ),
                guest_details: Vec::new(),
                status: if priced {
                    BookingStatus::PendingPayment
                } else {
                    BookingStatus::Confirmed
                },
                payment_expiry: priced.then(|| now + self.policy.payment_expiry()),
                rule_id: None,
                created_at: now,
                updated_at: now,
            };
            match self.insert_admitted(tx, &facility, &booking).await {
                Ok(()) => {}
                Err(TxError::Domain(err)) => {
                    tracing::debug!(%club_id, booking_id = %freed.id, error = %err, "freed slot no longer bookable");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
            if priced {
                tx.insert_payment(&self.bridge.pending_payment(&booking, now))
                    .await?;
            }
            tx.set_waitlist_status(club_id, entry.id, WaitlistStatus::Consumed)
                .await?;
            let notification = Notification::WaitlistPromoted {
                booking_id: booking.id,
                facility_id: booking.facility_id,
                start_time: booking.start_time,
                payment_expiry: booking.payment_expiry,
            };
            tx.enqueue(&OutboxMessage::new(club_id, booking.user_id, notification, now))
                .await?;

            tracing::info!(
                %club_id,
                booking_id = %booking.id,
                entry_id = %entry.id,
                status = booking.status.as_str(),
                "waitlist entry promoted"
            );
            return Ok(Some(booking.id));
        }
        Ok(None)
    }

    /// Conflict check and insert, under the facility-day lock.
    async fn insert_admitted(
        &self,
        tx: &mut dyn StorageTx,
        facility: &Facility,
        booking: &Booking,
    ) -> Result<(), TxError> {
        let club_id = booking.club_id;
        tx.lock_facility_window(club_id, booking.facility_id, booking.start_time)
            .await?;
        let overlapping = tx
            .find_overlapping_bookings(
                club_id,
                booking.facility_id,
                booking.start_time,
                booking.end_time,
            )
            .await?;
        if !overlapping.is_empty() {
            return Err(BookingError::BookingConflict(ConflictCause::Booking).into());
        }
        if self
            .catalog
            .has_maintenance_conflict(
                club_id,
                booking.facility_id,
                booking.start_time,
                booking.end_time,
            )
            .await?
        {
            return Err(BookingError::BookingConflict(ConflictCause::Maintenance).into());
        }
        let max_guests = facility.capacity.saturating_sub(1);
        if booking.guest_details.len() > usize::try_from(max_guests).unwrap_or(usize::MAX) {
            return Err(BookingError::InvalidInput(format!(
                "facility {} admits at most {max_guests} guests",
                facility.id
            ))
            .into());
        }
        tx.insert_booking(booking).await?;
        Ok(())
    }

    async fn active_facility(
        &self,
        club_id: ClubId,
        facility_id: FacilityId,
    ) -> Result<Facility, BookingError> {
        let facility = self
            .catalog
            .get_facility(club_id, facility_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("facility {facility_id}")))?;
        if !facility.is_active() {
            return Err(BookingError::FacilityInactive(facility_id));
        }
        Ok(facility)
    }

    async fn eligible_owner(
        &self,
        club_id: ClubId,
        owner_id: UserId,
        start: DateTime<Utc>,
    ) -> Result<UserProfile, BookingError> {
        let owner = self
            .users
            .get_user(club_id, owner_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("user {owner_id}")))?;
        if !owner.medical_certificate_valid_at(start) {
            return Err(BookingError::MedicalCertificateInvalid);
        }
        Ok(owner)
    }
}

/// Window rules: non-empty, on whole minutes, not in the past beyond the
/// tolerated skew, respecting the minimum lead and the horizon.
pub(crate) fn check_window(
    policy: &BookingPolicy,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), BookingError> {
    if start >= end {
        return Err(BookingError::InvalidInput(
            "start_time must be before end_time".to_string(),
        ));
    }
    if !on_whole_minute(start) || !on_whole_minute(end) {
        return Err(BookingError::InvalidInput(
            "start_time and end_time must fall on whole minutes".to_string(),
        ));
    }
    let earliest = now - policy.clock_skew();
    if start < earliest {
        return Err(BookingError::InvalidInput(
            "start_time is in the past".to_string(),
        ));
    }
    if start < earliest + policy.min_lead() {
        return Err(BookingError::InvalidInput(format!(
            "bookings must start at least {} minutes from now",
            policy.min_lead_minutes
        )));
    }
    if start > now + policy.horizon() {
        return Err(BookingError::InvalidInput(format!(
            "bookings may start at most {} days ahead",
            policy.horizon_days
        )));
    }
    Ok(())
}

fn on_whole_minute(t: DateTime<Utc>) -> bool {
    t.second() == 0 && t.nanosecond() == 0
}

fn guest(request: GuestRequest, fee: Decimal) -> Result<Guest, BookingError> {
    let name = request.name.trim();
    let dni = request.dni.trim();
    if name.is_empty() || dni.is_empty() {
        return Err(BookingError::InvalidInput(
            "every guest needs a name and a dni".to_string(),
        ));
    }
    Ok(Guest {
        name: name.to_string(),
        dni: dni.to_string(),
        fee_amount: fee,
    })
}

pub(crate) fn require_admin(principal: &Principal) -> Result<(), BookingError> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(BookingError::Forbidden("admin role required".to_string()))
    }
}

fn require_owner_or_admin(principal: &Principal, booking: &Booking) -> Result<(), BookingError> {
    if booking.user_id == principal.user_id || principal.is_admin() {
        Ok(())
    } else {
        Err(BookingError::Forbidden(format!(
            "booking {} belongs to another user",
            booking.id
        )))
    }
}

/// System-owned bookings (maintenance blocks) have nobody to notify.
fn is_system_owned(booking: &Booking) -> bool {
    booking.user_id.as_uuid().is_nil()
}

fn admission_message(booking: &Booking, now: DateTime<Utc>) -> Option<OutboxMessage> {
    if is_system_owned(booking) {
        return None;
    }
    let notification = match booking.payment_expiry {
        Some(payment_expiry) => Notification::BookingPendingPayment {
            booking_id: booking.id,
            total_price: booking.total_price,
            payment_expiry,
        },
        None => Notification::BookingConfirmed {
            booking_id: booking.id,
            facility_id: booking.facility_id,
            start_time: booking.start_time,
        },
    };
    Some(OutboxMessage::new(
        booking.club_id,
        booking.user_id,
        notification,
        now,
    ))
}

async fn cancel_pending_payments(
    tx: &mut dyn StorageTx,
    payments: Vec<Payment>,
) -> Result<(), TxError> {
    for mut payment in payments
        .into_iter()
        .filter(|p| p.status == PaymentStatus::Pending)
    {
        payment.status = PaymentStatus::Cancelled;
        tx.update_payment(&payment).await?;
    }
    Ok(())
}

/// Applies payment outcomes to bookings.
///
/// Registered with the [`PaymentBridge`] for `BOOKING` payments and invoked
/// inside the webhook's transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingPaymentResponder;

#[async_trait]
impl PaymentResponder for BookingPaymentResponder {
    async fn on_payment_status_changed(
        &self,
        tx: &mut dyn StorageTx,
        club_id: ClubId,
        reference_id: Uuid,
        new_status: PaymentStatus,
    ) -> Result<(), BookingError> {
        let booking_id = BookingId::from_uuid(reference_id);
        let Some(mut booking) = tx.get_booking(club_id, booking_id).await? else {
            tracing::warn!(%club_id, %booking_id, "payment refers to an unknown booking");
            return Ok(());
        };
        let now = Utc::now();

        let notification = match new_status {
            PaymentStatus::Completed => match booking.status {
                BookingStatus::PendingPayment => {
                    booking.transition(BookingStatus::Confirmed, now)?;
                    Notification::BookingConfirmed {
                        booking_id,
                        facility_id: booking.facility_id,
                        start_time: booking.start_time,
                    }
                }
                BookingStatus::Confirmed => return Ok(()),
                other => {
                    tracing::warn!(
                        incident = true,
                        %club_id,
                        %booking_id,
                        status = other.as_str(),
                        "payment settled for a booking that no longer holds its slot"
                    );
                    return Ok(());
                }
            },
            PaymentStatus::Failed | PaymentStatus::Refunded | PaymentStatus::Cancelled => {
                if !booking.is_active() {
                    return Ok(());
                }
                booking.transition(BookingStatus::Cancelled, now)?;
                Notification::BookingCancelled {
                    booking_id,
                    refund_due: false,
                }
            }
            PaymentStatus::Pending => return Ok(()),
        };

        tx.update_booking(&booking).await?;
        if !is_system_owned(&booking) {
            tx.enqueue(&OutboxMessage::new(club_id, booking.user_id, notification, now))
                .await?;
        }
        tracing::info!(
            %club_id,
            %booking_id,
            status = booking.status.as_str(),
            payment_status = new_status.as_str(),
            "booking updated from payment"
        );
        Ok(())
    }
}
