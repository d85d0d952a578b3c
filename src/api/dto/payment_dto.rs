//! Payment webhook notification shapes.
//!
//! The processor reports the event type as `type` or `topic` and the
//! payment id as `data.id` (or a bare `id`), in the query string, the JSON
//! body, or both. The query string wins.

use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::ports::WebhookRequest;
use crate::service::WebhookOutcome;

/// Webhook query string.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WebhookParams {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// Legacy event type.
    pub topic: Option<String>,
    /// Processor payment id.
    #[serde(rename = "data.id")]
    pub data_id: Option<String>,
    /// Legacy processor payment id.
    pub id: Option<String>,
}

/// `data` object of a webhook body.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct WebhookData {
    /// Processor payment id, sent as a number or a string.
    #[schema(value_type = Option<String>)]
    pub id: Option<serde_json::Value>,
}

/// Webhook JSON body.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct WebhookBody {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// Legacy event type.
    pub topic: Option<String>,
    /// Event payload.
    pub data: Option<WebhookData>,
}

impl WebhookBody {
    /// Parses a raw body; anything that is not a JSON object yields an empty
    /// body so the query string alone can drive the notification.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        serde_json::from_slice(raw).unwrap_or_default()
    }

    fn data_id(&self) -> Option<String> {
        match self.data.as_ref()?.id.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Merges query string, body and headers into one notification.
#[must_use]
pub fn webhook_request(
    params: WebhookParams,
    body: &WebhookBody,
    signature: Option<String>,
    request_id: Option<String>,
) -> WebhookRequest {
    let event_type = params
        .event_type
        .or(params.topic)
        .or_else(|| body.event_type.clone())
        .or_else(|| body.topic.clone());
    let data_id = params
        .data_id
        .or_else(|| body.data_id())
        .or(params.id);
    WebhookRequest {
        event_type,
        data_id,
        signature,
        request_id,
    }
}

/// Status word reported back to the processor.
#[must_use]
pub const fn outcome_label(outcome: WebhookOutcome) -> &'static str {
    match outcome {
        WebhookOutcome::Ignored => "ignored",
        WebhookOutcome::Unmatched => "unmatched",
        WebhookOutcome::Duplicate => "duplicate",
        WebhookOutcome::Applied(_) => "applied",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_wins_over_body() {
        let body = WebhookBody::parse(br#"{"type":"payment","data":{"id":"from-body"}}"#);
        let params = WebhookParams {
            data_id: Some("from-query".to_string()),
            ..WebhookParams::default()
        };
        let request = webhook_request(params, &body, None, None);
        assert_eq!(request.event_type.as_deref(), Some("payment"));
        assert_eq!(request.data_id.as_deref(), Some("from-query"));
    }

    #[test]
    fn numeric_ids_and_legacy_topic_are_accepted() {
        let body = WebhookBody::parse(br#"{"data":{"id":1234567}}"#);
        let params = WebhookParams {
            topic: Some("payment".to_string()),
            ..WebhookParams::default()
        };
        let request = webhook_request(params, &body, Some("sig".into()), Some("req".into()));
        assert_eq!(request.event_type.as_deref(), Some("payment"));
        assert_eq!(request.data_id.as_deref(), Some("1234567"));
        assert_eq!(request.request_id.as_deref(), Some("req"));
    }

    #[test]
    fn garbage_body_is_empty() {
        let body = WebhookBody::parse(b"not json");
        let request = webhook_request(WebhookParams::default(), &body, None, None);
        assert!(request.event_type.is_none());
        assert!(request.data_id.is_none());
    }
}
