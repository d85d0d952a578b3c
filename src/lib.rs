//! # club-booking
//!
//! Booking engine for multi-tenant sports clubs: members reserve facility
//! time windows, pay through an external processor, cancel (with refunds
//! inside the refund window), queue on a waitlist for full days, and admins
//! block facilities with weekly recurring rules.
//!
//! Every row belongs to exactly one club. The club comes from the caller's
//! [`Principal`](domain::Principal), never from a request body, and every
//! storage call is scoped by it.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)                 Payment processor (webhooks)
//!     │                                   │
//!     ├── REST Handlers (api/) ◄──────────┘
//!     ├── Principal extractor (auth/)
//!     │
//!     ├── BookingService ─── PaymentBridge ─── PaymentGateway (gateway/)
//!     ├── RecurringMaterializer       (service/)
//!     ├── Sweeper, OutboxDispatcher   (background loops)
//!     │
//!     ├── Domain records and rules (domain/)
//!     ├── Collaborator ports: catalogue, users, tenants (ports/)
//!     │
//!     └── Storage: PostgreSQL or in-memory (persistence/)
//! ```

pub mod api;
pub mod app_state;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod persistence;
pub mod ports;
pub mod service;
