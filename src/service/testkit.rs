//! Fixtures shared by the service tests: in-memory storage and catalogue,
//! the stub gateway, and one active priced facility.

#![allow(clippy::panic)]

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rust_decimal_macros::dec;

use super::{BookingPaymentResponder, BookingService, NewBooking, PaymentBridge, WebhookOutcome};
use crate::config::BookingPolicy;
use crate::domain::{
    Booking, BookingId, ClubId, Facility, FacilityId, FacilityStatus, GatewayPayment,
    MedicalCertStatus, OutboxMessage, Payment, PaymentStatus, Principal, ReferenceType, Role,
    UserId, UserProfile, WaitlistEntry,
};
use crate::gateway::signature::WebhookVerifier;
use crate::gateway::stub::StubPaymentGateway;
use crate::persistence::memory::MemoryStorage;
use crate::persistence::{Storage, StorageTx};
use crate::ports::memory::InMemoryCatalog;
use crate::ports::WebhookRequest;

pub(crate) const WEBHOOK_SECRET: &str = "test-webhook-secret";

fn time(h: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, 0, 0).unwrap_or_else(|| panic!("valid time"))
}

/// A whole engine wired on in-memory adapters.
pub(crate) struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub catalog: Arc<InMemoryCatalog>,
    pub gateway: Arc<StubPaymentGateway>,
    pub bridge: Arc<PaymentBridge>,
    pub bookings: BookingService,
    pub policy: BookingPolicy,
    pub club: ClubId,
    pub facility: Facility,
}

impl Harness {
    pub(crate) async fn new() -> Self {
        Self::with_policy(BookingPolicy::default()).await
    }

    pub(crate) async fn with_policy(policy: BookingPolicy) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let catalog = Arc::new(InMemoryCatalog::new());
        let gateway = Arc::new(StubPaymentGateway::new(WebhookVerifier::new(WEBHOOK_SECRET)));
        let club = ClubId::new();
        let facility = Facility {
            id: FacilityId::new(),
            club_id: club,
            name: "Court 1".to_string(),
            status: FacilityStatus::Active,
            capacity: 4,
            hourly_rate: dec!(100),
            guest_fee: dec!(50),
            opening_time: time(8),
            closing_time: time(22),
        };
        catalog.put_facility(facility.clone()).await;

        let dyn_storage = Arc::clone(&storage) as Arc<dyn Storage>;
        let bridge = Arc::new(
            PaymentBridge::new(
                Arc::clone(&dyn_storage),
                Arc::clone(&gateway) as _,
                policy.clone(),
            )
            .with_responder(ReferenceType::Booking, Arc::new(BookingPaymentResponder)),
        );
        let bookings = BookingService::new(
            dyn_storage,
            Arc::clone(&catalog) as _,
            Arc::clone(&catalog) as _,
            Arc::clone(&bridge),
            policy.clone(),
        );

        Self {
            storage,
            catalog,
            gateway,
            bridge,
            bookings,
            policy,
            club,
            facility,
        }
    }

    /// Registers another facility in the same club.
    pub(crate) async fn add_facility(&self, hourly_rate: rust_decimal::Decimal) -> Facility {
        let facility = Facility {
            id: FacilityId::new(),
            hourly_rate,
            guest_fee: rust_decimal::Decimal::ZERO,
            name: "Court 2".to_string(),
            ..self.facility.clone()
        };
        self.catalog.put_facility(facility.clone()).await;
        facility
    }

    /// A member with the given certificate status.
    pub(crate) async fn member_with(&self, cert: MedicalCertStatus) -> Principal {
        let user = UserProfile {
            id: UserId::new(),
            club_id: self.club,
            email: "member@example.com".to_string(),
            medical_cert_status: cert,
            medical_cert_expiry: None,
        };
        let id = user.id;
        self.catalog.put_user(user).await;
        Principal::new(id, self.club, Role::Member)
    }

    /// A member with a valid certificate.
    pub(crate) async fn member(&self) -> Principal {
        self.member_with(MedicalCertStatus::Valid).await
    }

    pub(crate) fn admin(&self) -> Principal {
        Principal::new(UserId::new(), self.club, Role::Admin)
    }

    /// `[day+days @ hour:00, + hours)`.
    pub(crate) fn window(days: i64, hour: u32, hours: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let day = (Utc::now() + Duration::days(days)).date_naive();
        let start = day.and_time(time(hour)).and_utc();
        (start, start + Duration::hours(hours))
    }

    pub(crate) fn request(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> NewBooking {
        NewBooking {
            facility_id: self.facility.id,
            start_time: start,
            end_time: end,
            guests: Vec::new(),
            owner_id: None,
        }
    }

    async fn tx(&self) -> Box<dyn StorageTx> {
        let Ok(tx) = self.storage.begin().await else {
            panic!("begin failed");
        };
        tx
    }

    pub(crate) async fn booking(&self, id: BookingId) -> Booking {
        let mut tx = self.tx().await;
        let Ok(Some(booking)) = tx.get_booking(self.club, id).await else {
            panic!("booking {id} missing");
        };
        booking
    }

    pub(crate) async fn payments(&self, id: BookingId) -> Vec<Payment> {
        let mut tx = self.tx().await;
        let Ok(payments) = tx.payments_for_reference(self.club, *id.as_uuid()).await else {
            panic!("payments lookup failed");
        };
        payments
    }

    pub(crate) async fn outbox(&self) -> Vec<OutboxMessage> {
        let mut tx = self.tx().await;
        let Ok(messages) = tx.claim_outbox(self.club, 1000).await else {
            panic!("outbox lookup failed");
        };
        messages
    }

    pub(crate) async fn waitlist_entry(&self, entry: &WaitlistEntry) -> Option<WaitlistEntry> {
        let mut tx = self.tx().await;
        let Ok(found) = tx
            .find_pending_waitlist_entry(self.club, entry.resource_id, entry.user_id, entry.target_date)
            .await
        else {
            panic!("waitlist lookup failed");
        };
        found
    }

    /// A correctly signed payment webhook for `data_id`.
    pub(crate) fn webhook(data_id: &str) -> WebhookRequest {
        let verifier = WebhookVerifier::new(WEBHOOK_SECRET);
        let Ok(signature) = verifier.sign(data_id, "req-1", "1700000000") else {
            panic!("signing failed");
        };
        WebhookRequest {
            event_type: Some("payment".to_string()),
            data_id: Some(data_id.to_string()),
            signature: Some(signature),
            request_id: Some("req-1".to_string()),
        }
    }

    /// Has the processor report `status` for the booking's newest payment
    /// and delivers the webhook.
    pub(crate) async fn settle(&self, booking: BookingId, status: PaymentStatus) -> WebhookOutcome {
        let Some(payment) = self.payments(booking).await.into_iter().next() else {
            panic!("booking {booking} has no payment");
        };
        let external_id = format!("mp-{}", payment.id);
        self.gateway
            .put_payment(GatewayPayment {
                external_id: external_id.clone(),
                local_reference: Some(payment.id),
                status,
                method: "credit_card".to_string(),
                paid_at: None,
            })
            .await;
        let Ok(outcome) = self
            .bridge
            .handle_webhook(&Self::webhook(&external_id), Utc::now())
            .await
        else {
            panic!("webhook failed");
        };
        outcome
    }

    /// Creates a booking for `principal` and pays it.
    pub(crate) async fn confirmed_booking(
        &self,
        principal: &Principal,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Booking {
        let Ok(created) = self
            .bookings
            .create_booking(principal, self.request(start, end))
            .await
        else {
            panic!("create failed");
        };
        self.settle(created.booking.id, PaymentStatus::Completed).await;
        self.booking(created.booking.id).await
    }
}
