//! Engine error type with HTTP status code mapping.
//!
//! [`BookingError`] is the central error type. Each variant is one of the
//! user-visible error kinds and maps to a stable `code` string and an HTTP
//! status. Foreign errors (storage, gateway, JSON) are translated into it at
//! the boundary of the component that sees them; no backend message or
//! stack trace is ever rendered for `internal`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::persistence::StorageError;

/// Structured JSON error response body.
///
/// ```json
/// { "error": "booking_conflict", "message": "slot overlaps an existing booking" }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Stable machine-readable error code.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

/// What a booking conflicted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCause {
    /// An active booking overlaps the requested window.
    Booking,
    /// A maintenance task overlaps the requested window.
    Maintenance,
}

impl std::fmt::Display for ConflictCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Booking => "slot overlaps an existing booking",
            Self::Maintenance => "slot overlaps scheduled maintenance",
        })
    }
}

/// Server-side error enum with HTTP status code mapping.
///
/// | Code                          | HTTP |
/// |-------------------------------|------|
/// | `invalid_input`               | 400  |
/// | `unauthorized`                | 401  |
/// | `forbidden`                   | 403  |
/// | `not_found`                   | 404  |
/// | `booking_conflict`            | 409  |
/// | `invalid_state`               | 409  |
/// | `facility_inactive`           | 422  |
/// | `medical_certificate_invalid` | 422  |
/// | `gateway_error`               | 502  |
/// | `internal`                    | 500  |
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    /// Malformed body, missing field, bad date or enum value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing or unverifiable credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Role denial, wrong owner or wrong tenant.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Entity absent under the caller's tenant scope.
    #[error("{0} not found")]
    NotFound(String),

    /// Requested window overlaps a booking or maintenance task.
    #[error("{0}")]
    BookingConflict(ConflictCause),

    /// Facility exists but is not bookable.
    #[error("facility {0} is not active")]
    FacilityInactive(crate::domain::FacilityId),

    /// Booking owner's medical certificate is missing, pending or expired.
    #[error("medical certificate missing or expired")]
    MedicalCertificateInvalid,

    /// Transition not allowed by the booking state machine.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Payment processor unreachable or rejected the call.
    #[error("payment gateway error: {0}")]
    Gateway(String),

    /// Storage failure after retries, or a broken invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Returns the stable error code for this variant.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::BookingConflict(_) => "booking_conflict",
            Self::FacilityInactive(_) => "facility_inactive",
            Self::MedicalCertificateInvalid => "medical_certificate_invalid",
            Self::InvalidState(_) => "invalid_state",
            Self::Gateway(_) => "gateway_error",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BookingConflict(_) | Self::InvalidState(_) => StatusCode::CONFLICT,
            Self::FacilityInactive(_) | Self::MedicalCertificateInvalid => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if this error means the slot was taken.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::BookingConflict(_))
    }
}

impl From<StorageError> for BookingError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(_) => Self::BookingConflict(ConflictCause::Booking),
            StorageError::NotFound(what) => Self::NotFound(what),
            StorageError::Serialization(msg) => {
                Self::Internal(format!("serialization failure after retries: {msg}"))
            }
            StorageError::Timeout => Self::Internal("storage deadline exceeded".to_string()),
            StorageError::Backend(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorResponse {
            error: self.code().to_string(),
            message,
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            BookingError::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BookingError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            BookingError::NotFound("booking".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BookingError::BookingConflict(ConflictCause::Booking).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            BookingError::InvalidState("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            BookingError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn codes_are_snake_case() {
        assert_eq!(
            BookingError::BookingConflict(ConflictCause::Maintenance).code(),
            "booking_conflict"
        );
        assert_eq!(
            BookingError::MedicalCertificateInvalid.code(),
            "medical_certificate_invalid"
        );
        assert_eq!(BookingError::Gateway("down".into()).code(), "gateway_error");
    }

    #[test]
    fn storage_conflict_becomes_booking_conflict() {
        let err = BookingError::from(StorageError::Conflict("bookings_active_slot".into()));
        assert!(err.is_conflict());
    }

    #[test]
    fn maintenance_conflict_message() {
        let err = BookingError::BookingConflict(ConflictCause::Maintenance);
        assert!(err.to_string().contains("maintenance"));
    }

    #[tokio::test]
    async fn internal_detail_is_not_rendered() {
        let response = BookingError::Internal("pg: relation bookings".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let Ok(bytes) = axum::body::to_bytes(response.into_body(), 1024).await else {
            panic!("body must be readable");
        };
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("\"error\":\"internal\""));
        assert!(!text.contains("relation"));
    }
}
