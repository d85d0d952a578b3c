//! Service layer: business logic orchestration.
//!
//! [`BookingService`] admits and cancels bookings and promotes the waitlist,
//! [`PaymentBridge`] reconciles the payment processor,
//! [`RecurringMaterializer`] expands recurring rules, and the background
//! jobs [`Sweeper`] and [`OutboxDispatcher`] advance time-driven state and
//! deliver notifications.

pub mod booking_service;
pub mod outbox;
pub mod payment_bridge;
pub mod recurring;
pub mod retry;
pub mod sweeper;

#[cfg(test)]
pub(crate) mod testkit;

pub use booking_service::{
    BookingPaymentResponder, BookingQuery, BookingService, CreatedBooking, GuestRequest,
    NewBooking,
};
pub use outbox::OutboxDispatcher;
pub use payment_bridge::{PaymentBridge, WebhookOutcome};
pub use recurring::{GenerationSummary, NewRule, RecurringMaterializer};
pub use sweeper::{SweepReport, Sweeper};
