//! OpenAPI document assembled from the handler annotations.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use super::handlers::{bookings, payments, recurring, system, waitlist};

/// Registers the bearer scheme referenced by `security(("bearer" = []))`.
#[derive(Debug)]
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("v1 signed token")
                    .build(),
            ),
        );
    }
}

/// The engine's REST API.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "club-booking",
        description = "Booking engine for multi-tenant sports clubs"
    ),
    paths(
        bookings::create_booking,
        bookings::list_own_bookings,
        bookings::list_all_bookings,
        bookings::get_booking,
        bookings::cancel_booking,
        bookings::availability,
        bookings::checkout,
        bookings::refund_booking,
        waitlist::join_waitlist,
        recurring::create_rule,
        recurring::list_rules,
        recurring::delete_rule,
        recurring::generate,
        payments::payment_webhook,
        system::health_handler,
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "Bookings", description = "Reservations, cancellations and availability"),
        (name = "Waitlist", description = "Queueing for a full day"),
        (name = "Recurring", description = "Weekly rules and their materialisation"),
        (name = "Payments", description = "Processor notifications"),
        (name = "System", description = "Health"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/bookings",
            "/api/v1/bookings/{id}",
            "/api/v1/bookings/availability",
            "/api/v1/bookings/waitlist",
            "/api/v1/bookings/recurring",
            "/api/v1/bookings/generate",
            "/api/v1/payments/webhook",
            "/health",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
    }
}
