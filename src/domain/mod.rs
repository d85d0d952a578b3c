//! Domain layer: plain records, lifecycle rules and pure computations.
//!
//! Nothing in here performs I/O. Bookings, recurring rules, waitlist
//! entries and payments are owned by the engine; facilities, maintenance
//! tasks and users are read-only views supplied by collaborators.

pub mod booking;
pub mod facility;
pub mod ids;
pub mod notification;
pub mod payment;
pub mod principal;
pub mod recurring;
pub mod slot;
pub mod waitlist;

pub use booking::{Booking, BookingStatus, Guest};
pub use facility::{Facility, FacilityStatus, MaintenanceTask, MedicalCertStatus, UserProfile};
pub use ids::{BookingId, ClubId, FacilityId, OutboxId, PaymentId, RuleId, UserId, WaitlistEntryId};
pub use notification::{Notification, OutboxMessage};
pub use payment::{GatewayPayment, Payment, PaymentStatus, ReferenceType};
pub use principal::{Principal, Role};
pub use recurring::{RecurringRule, RuleType};
pub use slot::{Slot, SlotStatus};
pub use waitlist::{WaitlistEntry, WaitlistStatus};
