//! REST adapter for the payment processor.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::normalize_status;
use super::signature::WebhookVerifier;
use crate::config::PaymentGatewayConfig;
use crate::domain::{GatewayPayment, Payment, PaymentId};
use crate::error::BookingError;
use crate::ports::{PaymentGateway, WebhookRequest};

#[derive(Debug, Serialize)]
struct PreferenceItem<'a> {
    title: &'a str,
    quantity: u32,
    unit_price: f64,
    currency_id: &'a str,
}

#[derive(Debug, Serialize)]
struct PreferencePayer<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct PreferenceRequest<'a> {
    items: Vec<PreferenceItem<'a>>,
    payer: PreferencePayer<'a>,
    external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    init_point: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: serde_json::Value,
    status: String,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    payment_method_id: Option<String>,
    #[serde(default)]
    date_approved: Option<DateTime<Utc>>,
}

impl From<PaymentResponse> for GatewayPayment {
    fn from(resp: PaymentResponse) -> Self {
        let external_id = match resp.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Self {
            external_id,
            local_reference: resp
                .external_reference
                .as_deref()
                .and_then(|r| r.parse::<PaymentId>().ok()),
            status: normalize_status(&resp.status),
            method: resp.payment_method_id.unwrap_or_default(),
            paid_at: resp.date_approved,
        }
    }
}

fn gateway_error(context: &str, err: impl std::fmt::Display) -> BookingError {
    BookingError::Gateway(format!("{context}: {err}"))
}

/// [`PaymentGateway`] that talks to the processor's REST API.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    config: PaymentGatewayConfig,
    currency: String,
    verifier: WebhookVerifier,
    http_client: Client,
}

impl HttpPaymentGateway {
    /// Creates an adapter with a client whose requests time out after
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Internal`] if the HTTP client cannot be built.
    pub fn new(
        config: PaymentGatewayConfig,
        currency: String,
        verifier: WebhookVerifier,
        timeout: Duration,
    ) -> Result<Self, BookingError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BookingError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            config,
            currency,
            verifier,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_preference(
        &self,
        payment: &Payment,
        payer_email: &str,
        description: &str,
    ) -> Result<String, BookingError> {
        let body = PreferenceRequest {
            items: vec![PreferenceItem {
                title: description,
                quantity: 1,
                unit_price: payment.amount.to_f64().unwrap_or_default(),
                currency_id: &self.currency,
            }],
            payer: PreferencePayer { email: payer_email },
            external_reference: payment.id.to_string(),
            notification_url: self.config.notification_url.as_deref(),
        };

        let response = self
            .http_client
            .post(self.url("/checkout/preferences"))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| gateway_error("create preference", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %error_body, "checkout preference rejected");
            return Err(gateway_error("create preference", status));
        }

        let preference: PreferenceResponse = response
            .json()
            .await
            .map_err(|e| gateway_error("decode preference", e))?;
        Ok(preference.init_point)
    }

    async fn process_webhook(
        &self,
        data_id: &str,
    ) -> Result<Option<GatewayPayment>, BookingError> {
        let response = self
            .http_client
            .get(self.url(&format!("/v1/payments/{data_id}")))
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| gateway_error("fetch payment", e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(gateway_error("fetch payment", response.status()));
        }

        let payment: PaymentResponse = response
            .json()
            .await
            .map_err(|e| gateway_error("decode payment", e))?;
        Ok(Some(payment.into()))
    }

    fn validate_webhook(&self, request: &WebhookRequest) -> Result<(), BookingError> {
        self.verifier.verify(request)
    }

    async fn refund(&self, external_id: &str) -> Result<(), BookingError> {
        let response = self
            .http_client
            .post(self.url(&format!("/v1/payments/{external_id}/refunds")))
            .bearer_auth(&self.config.access_token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| gateway_error("refund", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %error_body, external_id, "refund rejected");
            return Err(gateway_error("refund", status));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::PaymentStatus;

    #[test]
    fn numeric_ids_and_references_are_normalised() {
        let local = PaymentId::new();
        let raw = serde_json::json!({
            "id": 987_654_321_u64,
            "status": "approved",
            "external_reference": local.to_string(),
            "payment_method_id": "visa",
            "date_approved": "2025-06-01T10:05:00Z",
        });
        let Ok(resp) = serde_json::from_value::<PaymentResponse>(raw) else {
            panic!("payload should decode");
        };
        let payment = GatewayPayment::from(resp);
        assert_eq!(payment.external_id, "987654321");
        assert_eq!(payment.local_reference, Some(local));
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.method, "visa");
        assert!(payment.paid_at.is_some());
    }

    #[test]
    fn unknown_reference_is_ignored() {
        let raw = serde_json::json!({
            "id": "abc",
            "status": "in_process",
            "external_reference": "order-17",
        });
        let Ok(resp) = serde_json::from_value::<PaymentResponse>(raw) else {
            panic!("payload should decode");
        };
        let payment = GatewayPayment::from(resp);
        assert_eq!(payment.local_reference, None);
        assert_eq!(payment.status, PaymentStatus::Pending);
    }
}
