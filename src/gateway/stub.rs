//! Scriptable in-process payment gateway.
//!
//! Used when no processor is configured and throughout the test suite. The
//! stub answers webhooks from payments registered with
//! [`StubPaymentGateway::put_payment`], counts refunds, and can be told to
//! fail upcoming calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::signature::WebhookVerifier;
use crate::domain::{GatewayPayment, Payment, PaymentId};
use crate::error::BookingError;
use crate::ports::{PaymentGateway, WebhookRequest};

/// [`PaymentGateway`] with recorded calls and injectable failures.
#[derive(Debug)]
pub struct StubPaymentGateway {
    verifier: WebhookVerifier,
    payments: Mutex<HashMap<String, GatewayPayment>>,
    preferences: Mutex<Vec<PaymentId>>,
    refunds: Mutex<Vec<String>>,
    failing_refunds: AtomicU32,
    preferences_fail: AtomicBool,
}

impl StubPaymentGateway {
    /// Creates a stub that signs and verifies webhooks with `verifier`.
    #[must_use]
    pub fn new(verifier: WebhookVerifier) -> Self {
        Self {
            verifier,
            payments: Mutex::new(HashMap::new()),
            preferences: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
            failing_refunds: AtomicU32::new(0),
            preferences_fail: AtomicBool::new(false),
        }
    }

    /// Registers the processor-side view of a payment.
    pub async fn put_payment(&self, payment: GatewayPayment) {
        self.payments
            .lock()
            .await
            .insert(payment.external_id.clone(), payment);
    }

    /// Local payment ids a checkout was created for, in call order.
    pub async fn preferences(&self) -> Vec<PaymentId> {
        self.preferences.lock().await.clone()
    }

    /// External ids successfully refunded, in call order.
    pub async fn refunds(&self) -> Vec<String> {
        self.refunds.lock().await.clone()
    }

    /// Makes the next `n` refund calls fail.
    pub fn fail_next_refunds(&self, n: u32) {
        self.failing_refunds.store(n, Ordering::SeqCst);
    }

    /// Makes checkout creation fail until switched back.
    pub fn fail_preferences(&self, fail: bool) {
        self.preferences_fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for StubPaymentGateway {
    async fn create_preference(
        &self,
        payment: &Payment,
        _payer_email: &str,
        _description: &str,
    ) -> Result<String, BookingError> {
        if self.preferences_fail.load(Ordering::SeqCst) {
            return Err(BookingError::Gateway("processor unavailable".to_string()));
        }
        self.preferences.lock().await.push(payment.id);
        Ok(format!("https://checkout.invalid/pay/{}", payment.id))
    }

    async fn process_webhook(
        &self,
        data_id: &str,
    ) -> Result<Option<GatewayPayment>, BookingError> {
        Ok(self.payments.lock().await.get(data_id).cloned())
    }

    fn validate_webhook(&self, request: &WebhookRequest) -> Result<(), BookingError> {
        self.verifier.verify(request)
    }

    async fn refund(&self, external_id: &str) -> Result<(), BookingError> {
        let pending = self.failing_refunds.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_refunds.store(pending - 1, Ordering::SeqCst);
            return Err(BookingError::Gateway("refund rejected".to_string()));
        }
        self.refunds.lock().await.push(external_id.to_string());
        Ok(())
    }
}
