//! Type-safe entity identifiers.
//!
//! Every entity in the engine is keyed by a UUID v4. Each kind of key gets
//! its own newtype so a [`BookingId`] can never be passed where a
//! [`FacilityId`] is expected, and a [`ClubId`] is always explicit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random identifier (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Wraps an existing [`uuid::Uuid`].
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner [`uuid::Uuid`].
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Tenant key. Every row in the engine belongs to exactly one club.
    ClubId
);
uuid_id!(
    /// Identifier of a club member or staff user.
    UserId
);
uuid_id!(
    /// Identifier of a bookable facility (court, pool lane, field).
    FacilityId
);
uuid_id!(
    /// Identifier of a booking.
    BookingId
);
uuid_id!(
    /// Identifier of a recurring booking rule.
    RuleId
);
uuid_id!(
    /// Identifier of a waitlist entry.
    WaitlistEntryId
);
uuid_id!(
    /// Identifier of a local payment record.
    PaymentId
);
uuid_id!(
    /// Identifier of an outbox message.
    OutboxId
);
