//! Payment processor webhook.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{
    AckResponse, WebhookBody, WebhookParams, outcome_label, webhook_request,
};
use crate::api::extract::ApiQuery;
use crate::app_state::AppState;
use crate::error::{BookingError, ErrorResponse};

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `POST /payments/webhook`: Processor notification.
///
/// # Errors
///
/// Returns [`BookingError::Forbidden`] for a bad signature. Every other
/// outcome is acknowledged so the processor stops retrying.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    tag = "Payments",
    summary = "Payment webhook",
    description = "Public endpoint for processor notifications, authenticated by the `x-signature` HMAC over the payment id and `x-request-id`. The payment is re-fetched from the processor before any state changes; replays are no-ops.",
    params(WebhookParams),
    request_body(content = WebhookBody, description = "Optional notification body"),
    responses(
        (status = 200, description = "Notification acknowledged", body = AckResponse),
        (status = 403, description = "Signature rejected", body = ErrorResponse),
        (status = 500, description = "Notification contradicts local records", body = ErrorResponse),
    )
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<WebhookParams>,
    body: Bytes,
) -> Result<impl IntoResponse, BookingError> {
    let request = webhook_request(
        params,
        &WebhookBody::parse(&body),
        header(&headers, "x-signature"),
        header(&headers, "x-request-id"),
    );
    let outcome = state.bridge.handle_webhook(&request, Utc::now()).await?;
    Ok(Json(AckResponse::new(outcome_label(outcome))))
}

/// Payment routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/payments/webhook", post(payment_webhook))
}
