//! Data Transfer Objects for REST request/response serialization.
//!
//! Monetary amounts are serialized as decimal strings, timestamps as
//! RFC 3339 in UTC and dates as `YYYY-MM-DD`. Request bodies never carry a
//! tenant: unknown fields such as `club_id` are ignored.

pub mod booking_dto;
pub mod common_dto;
pub mod payment_dto;
pub mod recurring_dto;
pub mod waitlist_dto;

pub use booking_dto::*;
pub use common_dto::*;
pub use payment_dto::*;
pub use recurring_dto::*;
pub use waitlist_dto::*;
