//! Shared DTO types used across multiple endpoints.

use serde::Serialize;
use utoipa::ToSchema;

/// Minimal acknowledgement body.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AckResponse {
    /// What happened, e.g. `"refunded"` or `"duplicate"`.
    pub status: String,
}

impl AckResponse {
    /// Builds an acknowledgement with the given status word.
    #[must_use]
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}
