//! Notification sender that writes to the log.

use async_trait::async_trait;

use crate::domain::OutboxMessage;
use crate::error::BookingError;
use crate::ports::NotificationSender;

/// [`NotificationSender`] that records each message as a structured
/// `info!` event. Used by the binary until a mail/push channel is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, message: &OutboxMessage) -> Result<(), BookingError> {
        tracing::info!(
            club_id = %message.club_id,
            recipient = %message.recipient,
            booking_id = %message.notification.booking_id(),
            event_type = message.notification.event_type_str(),
            "notification delivered"
        );
        Ok(())
    }
}
