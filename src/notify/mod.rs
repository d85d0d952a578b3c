//! Notification senders drained by the outbox dispatcher.

pub mod broadcast;
pub mod log;

pub use broadcast::BroadcastNotifier;
pub use log::LogNotifier;
