//! REST API layer: route handlers, DTOs, extractors and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` and the API
//! description live at the root.

pub mod dto;
pub mod extract;
pub mod handlers;
pub mod openapi;

use axum::Router;

use crate::app_state::AppState;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use chrono::{Duration, Utc};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::TokenVerifier;
    use crate::domain::{BookingId, GatewayPayment, PaymentStatus, Principal};
    use crate::service::RecurringMaterializer;
    use crate::service::testkit::Harness;

    const TOKEN_SECRET: &str = "api-test-secret";

    struct Api {
        h: Harness,
        app: Router,
        tokens: TokenVerifier,
    }

    async fn api() -> Api {
        let h = Harness::new().await;
        let materializer = RecurringMaterializer::new(
            h.bookings.clone(),
            Arc::clone(&h.storage) as _,
            Arc::clone(&h.catalog) as _,
            Arc::clone(&h.catalog) as _,
        );
        let state = AppState {
            bookings: Arc::new(h.bookings.clone()),
            materializer: Arc::new(materializer),
            bridge: Arc::clone(&h.bridge),
            tokens: Arc::new(TokenVerifier::new(TOKEN_SECRET)),
        };
        Api {
            app: build_router().with_state(state),
            h,
            tokens: TokenVerifier::new(TOKEN_SECRET),
        }
    }

    fn request(method: &str, uri: &str, auth: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let Ok(req) = builder.body(body) else {
            panic!("bad request");
        };
        req
    }

    impl Api {
        fn bearer(&self, principal: &Principal) -> String {
            let Ok(token) = self.tokens.issue(principal, Utc::now() + Duration::hours(1)) else {
                panic!("issue failed");
            };
            format!("Bearer {token}")
        }

        async fn call(&self, req: Request<Body>) -> (StatusCode, Value) {
            let Ok(response) = self.app.clone().oneshot(req).await else {
                panic!("router failed");
            };
            let status = response.status();
            let Ok(bytes) = to_bytes(response.into_body(), usize::MAX).await else {
                panic!("body failed");
            };
            (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }

        fn booking_body(&self, days: i64) -> Value {
            let (start, end) = Harness::window(days, 10, 1);
            json!({
                "facility_id": self.h.facility.id,
                "start_time": start,
                "end_time": end,
            })
        }
    }

    #[tokio::test]
    async fn health_is_public() {
        let api = api().await;
        let (status, body) = api.call(request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let api = api().await;
        let (status, body) = api.call(request("GET", "/api/v1/bookings", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn create_then_conflict() {
        let api = api().await;
        let (u1, u2) = (api.h.member().await, api.h.member().await);

        let (status, body) = api
            .call(request(
                "POST",
                "/api/v1/bookings",
                Some(&api.bearer(&u1)),
                Some(api.booking_body(2)),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["booking"]["status"], "PENDING_PAYMENT");
        assert!(body["checkout_url"].is_string());

        let (status, body) = api
            .call(request(
                "POST",
                "/api/v1/bookings",
                Some(&api.bearer(&u2)),
                Some(api.booking_body(2)),
            ))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "booking_conflict");
    }

    #[tokio::test]
    async fn tenant_in_body_is_ignored() {
        let api = api().await;
        let member = api.h.member().await;
        let mut body = api.booking_body(2);
        body["club_id"] = json!(uuid::Uuid::new_v4());
        let (status, created) = api
            .call(request("POST", "/api/v1/bookings", Some(&api.bearer(&member)), Some(body)))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["booking"]["club_id"], json!(api.h.club));
    }

    #[tokio::test]
    async fn malformed_input_is_invalid_input() {
        let api = api().await;
        let member = api.h.member().await;
        let auth = api.bearer(&member);

        let (status, body) = api
            .call(request(
                "POST",
                "/api/v1/bookings",
                Some(&auth),
                Some(json!({ "facility_id": "not-a-uuid" })),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let (status, body) = api
            .call(request("GET", "/api/v1/bookings/not-a-uuid", Some(&auth), None))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let (status, _) = api
            .call(request(
                "GET",
                "/api/v1/bookings/availability?date=2030-13-40",
                Some(&auth),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_routes_reject_members() {
        let api = api().await;
        let member = api.h.member().await;
        let (status, body) = api
            .call(request("GET", "/api/v1/bookings/all", Some(&api.bearer(&member)), None))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let (status, _) = api
            .call(request(
                "POST",
                "/api/v1/bookings/generate?horizon_days=7",
                Some(&api.bearer(&api.h.admin())),
                None,
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_confirms_and_cancel_releases() {
        let api = api().await;
        let member = api.h.member().await;
        let auth = api.bearer(&member);
        let (_, created) = api
            .call(request("POST", "/api/v1/bookings", Some(&auth), Some(api.booking_body(3))))
            .await;
        let Some(id) = created["booking"]["id"].as_str().map(str::to_string) else {
            panic!("booking id missing");
        };
        let Ok(booking_id) = id.parse::<BookingId>() else {
            panic!("bad booking id");
        };
        let Some(payment) = api.h.payments(booking_id).await.into_iter().next() else {
            panic!("payment missing");
        };

        let external_id = "mp-555";
        api.h
            .gateway
            .put_payment(GatewayPayment {
                external_id: external_id.to_string(),
                local_reference: Some(payment.id),
                status: PaymentStatus::Completed,
                method: "credit_card".to_string(),
                paid_at: None,
            })
            .await;

        let uri = format!("/api/v1/payments/webhook?type=payment&data.id={external_id}");
        let (status, body) = api.call(request("POST", &uri, None, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let signed = Harness::webhook(external_id);
        let Some(signature) = signed.signature else {
            panic!("signature missing");
        };
        let mut req = request("POST", &uri, None, Some(json!({ "action": "payment.updated" })));
        let Ok(sig) = signature.parse::<header::HeaderValue>() else {
            panic!("bad header");
        };
        req.headers_mut().insert("x-signature", sig);
        req.headers_mut()
            .insert("x-request-id", header::HeaderValue::from_static("req-1"));
        let (status, body) = api.call(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "applied");

        let (_, fetched) = api
            .call(request("GET", &format!("/api/v1/bookings/{id}"), Some(&auth), None))
            .await;
        assert_eq!(fetched["status"], "CONFIRMED");

        let (status, cancelled) = api
            .call(request("DELETE", &format!("/api/v1/bookings/{id}"), Some(&auth), None))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["status"], "CANCELLED");
        assert_eq!(api.h.gateway.refunds().await, vec![external_id.to_string()]);
    }
}
