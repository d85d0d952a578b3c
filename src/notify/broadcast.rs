//! In-process notification fan-out.
//!
//! [`BroadcastNotifier`] wraps a [`tokio::sync::broadcast`] channel. The
//! outbox dispatcher hands every delivered [`OutboxMessage`] to it and any
//! number of in-process consumers subscribe to the stream.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::OutboxMessage;
use crate::error::BookingError;
use crate::ports::NotificationSender;

/// Broadcast bus for delivered notifications.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity.
/// When the ring buffer is full, the oldest messages are dropped for
/// lagging receivers.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<OutboxMessage>,
}

impl BroadcastNotifier {
    /// Creates a new notifier with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new receiver that will see all future messages.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OutboxMessage> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl NotificationSender for BroadcastNotifier {
    async fn send(&self, message: &OutboxMessage) -> Result<(), BookingError> {
        // No subscribers still counts as delivered.
        let _ = self.sender.send(message.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{BookingId, ClubId, Notification, UserId};
    use chrono::Utc;

    fn message() -> OutboxMessage {
        OutboxMessage::new(
            ClubId::new(),
            UserId::new(),
            Notification::BookingExpired {
                booking_id: BookingId::new(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn send_without_receivers_succeeds() {
        let bus = BroadcastNotifier::new(16);
        assert!(bus.send(&message()).await.is_ok());
    }

    #[tokio::test]
    async fn every_subscriber_receives_the_message() {
        let bus = BroadcastNotifier::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let sent = message();
        assert!(bus.send(&sent).await.is_ok());

        let Ok(m1) = rx1.recv().await else {
            panic!("rx1 failed");
        };
        let Ok(m2) = rx2.recv().await else {
            panic!("rx2 failed");
        };
        assert_eq!(m1, sent);
        assert_eq!(m2.id, sent.id);
    }

    #[test]
    fn receiver_count_tracks_subscribers() {
        let bus = BroadcastNotifier::new(16);
        assert_eq!(bus.receiver_count(), 0);
        let rx = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);
        drop(rx);
        assert_eq!(bus.receiver_count(), 0);
    }
}
