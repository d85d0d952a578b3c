//! REST endpoint handlers organized by resource.

pub mod bookings;
pub mod payments;
pub mod recurring;
pub mod system;
pub mod waitlist;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(bookings::routes())
        .merge(waitlist::routes())
        .merge(recurring::routes())
        .merge(payments::routes())
}
