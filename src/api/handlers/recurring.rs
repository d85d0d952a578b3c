//! Recurring rule handlers (admin only).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, post};
use axum::{Json, Router};

use crate::api::dto::{CreateRuleRequest, GenerateParams, GenerationSummaryDto};
use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::app_state::AppState;
use crate::domain::{Principal, RecurringRule, RuleId};
use crate::error::{BookingError, ErrorResponse};

/// `POST /bookings/recurring`: Create a weekly rule.
///
/// # Errors
///
/// Returns [`BookingError`] for non-admins, unknown facilities or malformed
/// rules.
#[utoipa::path(
    post,
    path = "/api/v1/bookings/recurring",
    tag = "Recurring",
    summary = "Create a recurring rule",
    description = "Stores a weekly pattern. Nothing is booked until the rule is materialised.",
    request_body = CreateRuleRequest,
    responses(
        (status = 201, description = "Rule created", body = RecurringRule),
        (status = 400, description = "Malformed rule", body = ErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
        (status = 404, description = "Facility not found", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn create_rule(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<CreateRuleRequest>,
) -> Result<impl IntoResponse, BookingError> {
    let rule = state.materializer.create_rule(&principal, req.into()).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// `GET /bookings/recurring`: Active rules.
///
/// # Errors
///
/// Returns [`BookingError::Forbidden`] for non-admins.
#[utoipa::path(
    get,
    path = "/api/v1/bookings/recurring",
    tag = "Recurring",
    summary = "List recurring rules",
    description = "Rules that are not retired and have not ended.",
    responses(
        (status = 200, description = "Active rules", body = Vec<RecurringRule>),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn list_rules(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<impl IntoResponse, BookingError> {
    Ok(Json(state.materializer.list_rules(&principal).await?))
}

/// `DELETE /bookings/recurring/{id}`: Retire a rule.
///
/// # Errors
///
/// Returns [`BookingError`] for non-admins or unknown rules.
#[utoipa::path(
    delete,
    path = "/api/v1/bookings/recurring/{id}",
    tag = "Recurring",
    summary = "Retire a recurring rule",
    description = "Soft-deletes the rule. Bookings it already produced are kept.",
    params(("id" = uuid::Uuid, Path, description = "Rule UUID")),
    responses(
        (status = 204, description = "Rule retired"),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
        (status = 404, description = "Rule not found", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn delete_rule(
    State(state): State<AppState>,
    principal: Principal,
    ApiPath(id): ApiPath<uuid::Uuid>,
) -> Result<impl IntoResponse, BookingError> {
    state
        .materializer
        .delete_rule(&principal, RuleId::from_uuid(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /bookings/generate`: Materialise rules now.
///
/// # Errors
///
/// Returns [`BookingError`] for non-admins or storage failure.
#[utoipa::path(
    post,
    path = "/api/v1/bookings/generate",
    tag = "Recurring",
    summary = "Materialise recurring rules",
    description = "Books every occurrence of the club's active rules from today through `horizon_days`. Occurrences that conflict or fail a precondition are skipped; re-running is harmless.",
    params(GenerateParams),
    responses(
        (status = 200, description = "Generation summary", body = GenerationSummaryDto),
        (status = 403, description = "Caller is not an admin", body = ErrorResponse),
    ),
    security(("bearer" = []))
)]
pub async fn generate(
    State(state): State<AppState>,
    principal: Principal,
    ApiQuery(params): ApiQuery<GenerateParams>,
) -> Result<impl IntoResponse, BookingError> {
    let horizon_days = params.horizon_days.unwrap_or_else(|| {
        u32::try_from(state.bookings.policy().horizon_days).unwrap_or(0)
    });
    let summary = state
        .materializer
        .generate_from_rules(&principal, horizon_days)
        .await?;
    Ok(Json(GenerationSummaryDto::from(summary)))
}

/// Recurring rule routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings/recurring", post(create_rule).get(list_rules))
        .route("/bookings/recurring/{id}", delete(delete_rule))
        .route("/bookings/generate", post(generate))
}
