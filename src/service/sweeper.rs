//! Periodic job advancing time-driven transitions.
//!
//! Each run walks every club and, in one transaction per club, expires
//! unpaid bookings, completes finished ones and expires stale waitlist
//! entries. Slots freed by expiry are not offered to the waitlist.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::retry;
use crate::config::BookingPolicy;
use crate::domain::{BookingStatus, ClubId, Notification, OutboxMessage, PaymentStatus};
use crate::error::BookingError;
use crate::persistence::Storage;
use crate::ports::TenantDirectory;

/// Counts of what one sweep changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `PENDING_PAYMENT → EXPIRED` transitions.
    pub expired: u64,
    /// `CONFIRMED → COMPLETED` transitions.
    pub completed: u64,
    /// Waitlist entries expired.
    pub waitlist_expired: u64,
}

impl std::ops::AddAssign for SweepReport {
    fn add_assign(&mut self, rhs: Self) {
        self.expired += rhs.expired;
        self.completed += rhs.completed;
        self.waitlist_expired += rhs.waitlist_expired;
    }
}

/// The sweeper job.
#[derive(Debug, Clone)]
pub struct Sweeper {
    storage: Arc<dyn Storage>,
    tenants: Arc<dyn TenantDirectory>,
    policy: BookingPolicy,
}

impl Sweeper {
    /// Creates a sweeper over every club `tenants` lists.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        tenants: Arc<dyn TenantDirectory>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            storage,
            tenants,
            policy,
        }
    }

    /// Sweeps every club as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `internal` if the tenant list cannot be read. A failing club
    /// is logged and skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, BookingError> {
        let mut total = SweepReport::default();
        for club_id in self.tenants.list_clubs().await? {
            match self.sweep_club(club_id, now).await {
                Ok(report) => total += report,
                Err(err) => tracing::warn!(%club_id, error = %err, "sweep failed"),
            }
        }
        Ok(total)
    }

    /// Sweeps one club in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns `internal` if storage fails after retries.
    pub async fn sweep_club(
        &self,
        club_id: ClubId,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, BookingError> {
        let completion_cutoff = now - self.policy.completion_grace();
        let waitlist_cutoff = now - self.policy.waitlist_ttl();

        let report = retry::run(
            self.storage.as_ref(),
            self.policy.storage_timeout,
            "sweep",
            move |mut tx| async move {
                let mut report = SweepReport::default();

                for mut booking in tx.bookings_due_for_expiry(club_id, now).await? {
                    booking.transition(BookingStatus::Expired, now)?;
                    tx.update_booking(&booking).await?;
                    for mut payment in tx
                        .payments_for_reference(club_id, *booking.id.as_uuid())
                        .await?
                        .into_iter()
                        .filter(|p| p.status == PaymentStatus::Pending)
                    {
                        payment.status = PaymentStatus::Cancelled;
                        tx.update_payment(&payment).await?;
                    }
                    if !booking.user_id.as_uuid().is_nil() {
                        let notification = Notification::BookingExpired {
                            booking_id: booking.id,
                        };
                        tx.enqueue(&OutboxMessage::new(
                            club_id,
                            booking.user_id,
                            notification,
                            now,
                        ))
                        .await?;
                    }
                    tracing::info!(%club_id, booking_id = %booking.id, status = "EXPIRED", "booking expired");
                    report.expired += 1;
                }

                for mut booking in tx
                    .bookings_due_for_completion(club_id, completion_cutoff)
                    .await?
                {
                    booking.transition(BookingStatus::Completed, now)?;
                    tx.update_booking(&booking).await?;
                    report.completed += 1;
                }

                report.waitlist_expired = tx
                    .expire_waitlist_entries(club_id, waitlist_cutoff)
                    .await?;

                tx.commit().await?;
                Ok(report)
            },
        )
        .await?;

        if report != SweepReport::default() {
            tracing::info!(
                %club_id,
                expired = report.expired,
                completed = report.completed,
                waitlist_expired = report.waitlist_expired,
                "sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` flips to `true`.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep(Utc::now()).await {
                        tracing::warn!(error = %err, "sweep run failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("sweeper stopped");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::service::testkit::Harness;
    use chrono::Duration as ChronoDuration;

    fn sweeper(h: &Harness) -> Sweeper {
        Sweeper::new(
            Arc::clone(&h.storage) as _,
            Arc::clone(&h.catalog) as _,
            h.policy.clone(),
        )
    }

    #[tokio::test]
    async fn unpaid_bookings_expire_and_free_the_slot() {
        let h = Harness::new().await;
        let (u1, u2) = (h.member().await, h.member().await);
        let (start, end) = Harness::window(2, 10, 1);
        let Ok(created) = h.bookings.create_booking(&u1, h.request(start, end)).await else {
            panic!("create failed");
        };

        let Ok(early) = sweeper(&h).sweep(Utc::now()).await else {
            panic!("sweep failed");
        };
        assert_eq!(early.expired, 0);

        let later = Utc::now() + ChronoDuration::minutes(31);
        let Ok(report) = sweeper(&h).sweep(later).await else {
            panic!("sweep failed");
        };
        assert_eq!(report.expired, 1);

        let booking = h.booking(created.booking.id).await;
        assert_eq!(booking.status, BookingStatus::Expired);
        assert!(booking.payment_expiry.is_none());
        let Some(payment) = h.payments(booking.id).await.into_iter().next() else {
            panic!("payment missing");
        };
        assert_eq!(payment.status, PaymentStatus::Cancelled);
        assert!(h.outbox().await.iter().any(|m| m.recipient == u1.user_id
            && matches!(m.notification, Notification::BookingExpired { .. })));

        let Ok(again) = h.bookings.create_booking(&u2, h.request(start, end)).await else {
            panic!("slot should be free again");
        };
        assert_eq!(again.booking.status, BookingStatus::PendingPayment);
    }

    #[tokio::test]
    async fn finished_bookings_complete_after_the_grace() {
        let h = Harness::with_policy(BookingPolicy {
            completion_grace_minutes: 15,
            ..BookingPolicy::default()
        })
        .await;
        let member = h.member().await;
        let (start, end) = Harness::window(2, 10, 1);
        let booking = h.confirmed_booking(&member, start, end).await;

        let Ok(report) = sweeper(&h).sweep(end + ChronoDuration::minutes(10)).await else {
            panic!("sweep failed");
        };
        assert_eq!(report.completed, 0);

        let Ok(report) = sweeper(&h).sweep(end + ChronoDuration::minutes(16)).await else {
            panic!("sweep failed");
        };
        assert_eq!(report.completed, 1);
        assert_eq!(h.booking(booking.id).await.status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn stale_waitlist_entries_expire() {
        let h = Harness::new().await;
        let member = h.member().await;
        let date = Harness::window(5, 10, 1).0.date_naive();
        let Ok(entry) = h.bookings.join_waitlist(&member, h.facility.id, date).await else {
            panic!("join failed");
        };

        let Ok(report) = sweeper(&h).sweep(Utc::now() + ChronoDuration::hours(49)).await else {
            panic!("sweep failed");
        };
        assert_eq!(report.waitlist_expired, 1);
        assert!(h.waitlist_entry(&entry).await.is_none());
    }

    #[tokio::test]
    async fn quiet_clubs_report_nothing() {
        let h = Harness::new().await;
        let Ok(report) = sweeper(&h).sweep(Utc::now()).await else {
            panic!("sweep failed");
        };
        assert_eq!(report, SweepReport::default());
    }
}
