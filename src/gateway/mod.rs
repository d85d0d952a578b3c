//! Payment processor adapters.
//!
//! [`http::HttpPaymentGateway`] talks to the processor's REST API;
//! [`stub::StubPaymentGateway`] stands in for it when no processor is
//! configured. Both verify webhooks through [`signature::WebhookVerifier`].

pub mod http;
pub mod signature;
pub mod stub;

use crate::domain::PaymentStatus;

/// Maps a processor status string onto [`PaymentStatus`].
///
/// | Processor                   | Local       |
/// |-----------------------------|-------------|
/// | `approved`                  | `COMPLETED` |
/// | `rejected`                  | `FAILED`    |
/// | `cancelled`                 | `CANCELLED` |
/// | `refunded`, `charged_back`  | `REFUNDED`  |
/// | anything else               | `PENDING`   |
#[must_use]
pub fn normalize_status(raw: &str) -> PaymentStatus {
    match raw {
        "approved" => PaymentStatus::Completed,
        "rejected" => PaymentStatus::Failed,
        "cancelled" => PaymentStatus::Cancelled,
        "refunded" | "charged_back" => PaymentStatus::Refunded,
        _ => PaymentStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(normalize_status("approved"), PaymentStatus::Completed);
        assert_eq!(normalize_status("rejected"), PaymentStatus::Failed);
        assert_eq!(normalize_status("cancelled"), PaymentStatus::Cancelled);
        assert_eq!(normalize_status("charged_back"), PaymentStatus::Refunded);
        assert_eq!(normalize_status("in_mediation"), PaymentStatus::Pending);
    }
}
