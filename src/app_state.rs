//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::service::{BookingService, PaymentBridge, RecurringMaterializer};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Booking admission, cancellation, waitlist and availability.
    pub bookings: Arc<BookingService>,
    /// Recurring rule management.
    pub materializer: Arc<RecurringMaterializer>,
    /// Payment webhook reconciliation.
    pub bridge: Arc<PaymentBridge>,
    /// Bearer token verification.
    pub tokens: Arc<TokenVerifier>,
}
