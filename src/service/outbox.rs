//! Outbox dispatcher: drains committed notifications to the sender.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::retry;
use crate::domain::ClubId;
use crate::error::BookingError;
use crate::persistence::Storage;
use crate::ports::{NotificationSender, TenantDirectory};

/// Delivers outbox rows, oldest first, at least once.
#[derive(Debug, Clone)]
pub struct OutboxDispatcher {
    storage: Arc<dyn Storage>,
    tenants: Arc<dyn TenantDirectory>,
    sender: Arc<dyn NotificationSender>,
    batch_size: u32,
    storage_timeout: Duration,
}

impl OutboxDispatcher {
    /// Creates a dispatcher claiming up to `batch_size` rows per club and run.
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        tenants: Arc<dyn TenantDirectory>,
        sender: Arc<dyn NotificationSender>,
        batch_size: u32,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            tenants,
            sender,
            batch_size,
            storage_timeout,
        }
    }

    /// Dispatches one batch for every club and returns how many were
    /// delivered.
    ///
    /// # Errors
    ///
    /// Returns `internal` if the tenant list cannot be read.
    pub async fn dispatch(&self, now: DateTime<Utc>) -> Result<u64, BookingError> {
        let mut delivered = 0;
        for club_id in self.tenants.list_clubs().await? {
            match self.dispatch_club(club_id, now).await {
                Ok(n) => delivered += n,
                Err(err) => tracing::warn!(%club_id, error = %err, "outbox dispatch failed"),
            }
        }
        Ok(delivered)
    }

    /// Dispatches one batch for `club_id`.
    ///
    /// Failed sends stay queued with their attempt count bumped.
    ///
    /// # Errors
    ///
    /// Returns `internal` if storage fails after retries.
    pub async fn dispatch_club(
        &self,
        club_id: ClubId,
        now: DateTime<Utc>,
    ) -> Result<u64, BookingError> {
        let sender = self.sender.as_ref();
        let limit = self.batch_size;
        retry::run(
            self.storage.as_ref(),
            self.storage_timeout,
            "dispatch_outbox",
            move |mut tx| async move {
                let mut delivered = 0;
                for message in tx.claim_outbox(club_id, limit).await? {
                    match sender.send(&message).await {
                        Ok(()) => {
                            tx.mark_delivered(club_id, message.id, now).await?;
                            delivered += 1;
                        }
                        Err(err) => {
                            tracing::warn!(
                                %club_id,
                                outbox_id = %message.id,
                                attempts = message.attempts + 1,
                                error = %err,
                                "notification delivery failed"
                            );
                            tx.mark_failed(club_id, message.id).await?;
                        }
                    }
                }
                tx.commit().await?;
                Ok(delivered)
            },
        )
        .await
    }

    /// Dispatches every `interval` until `shutdown` flips to `true`.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.dispatch(Utc::now()).await {
                        tracing::warn!(error = %err, "outbox run failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("outbox dispatcher stopped");
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::domain::{Notification, OutboxMessage};
    use crate::notify::BroadcastNotifier;
    use crate::service::testkit::Harness;

    #[derive(Debug, Default)]
    struct Unreachable {
        down: AtomicBool,
    }

    #[async_trait]
    impl NotificationSender for Unreachable {
        async fn send(&self, _message: &OutboxMessage) -> Result<(), BookingError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(BookingError::Internal("smtp refused".to_string()));
            }
            Ok(())
        }
    }

    fn dispatcher(h: &Harness, sender: Arc<dyn NotificationSender>) -> OutboxDispatcher {
        OutboxDispatcher::new(
            Arc::clone(&h.storage) as _,
            Arc::clone(&h.catalog) as _,
            sender,
            100,
            Duration::from_secs(5),
        )
    }

    async fn book(h: &Harness) {
        let member = h.member().await;
        let (start, end) = Harness::window(2, 10, 1);
        let Ok(_) = h.bookings.create_booking(&member, h.request(start, end)).await else {
            panic!("create failed");
        };
    }

    #[tokio::test]
    async fn committed_notifications_reach_subscribers_once() {
        let h = Harness::new().await;
        book(&h).await;
        let bus = BroadcastNotifier::new(16);
        let mut rx = bus.subscribe();
        let outbox = dispatcher(&h, Arc::new(bus));

        let Ok(delivered) = outbox.dispatch(Utc::now()).await else {
            panic!("dispatch failed");
        };
        assert_eq!(delivered, 1);
        let Ok(message) = rx.try_recv() else {
            panic!("nothing broadcast");
        };
        assert!(matches!(
            message.notification,
            Notification::BookingPendingPayment { .. }
        ));
        assert!(h.outbox().await.is_empty());

        let Ok(delivered) = outbox.dispatch(Utc::now()).await else {
            panic!("dispatch failed");
        };
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn failed_sends_stay_queued() {
        let h = Harness::new().await;
        book(&h).await;
        let sender = Arc::new(Unreachable::default());
        sender.down.store(true, Ordering::SeqCst);
        let outbox = dispatcher(&h, Arc::clone(&sender) as _);

        let Ok(delivered) = outbox.dispatch(Utc::now()).await else {
            panic!("dispatch failed");
        };
        assert_eq!(delivered, 0);
        let queued = h.outbox().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued.first().map(|m| m.attempts), Some(1));

        sender.down.store(false, Ordering::SeqCst);
        let Ok(delivered) = outbox.dispatch(Utc::now()).await else {
            panic!("dispatch failed");
        };
        assert_eq!(delivered, 1);
        assert!(h.outbox().await.is_empty());
    }
}
