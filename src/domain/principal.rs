//! Authenticated caller identity.

use serde::{Deserialize, Serialize};

use super::{ClubId, UserId};

/// Role carried by a principal inside its club.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Regular club member.
    Member,
    /// Club staff (coaches, desk).
    Staff,
    /// Club administrator.
    Admin,
    /// Platform-wide administrator.
    SuperAdmin,
    /// Internal principal used by background jobs and MAINTENANCE rules.
    System,
}

impl Role {
    /// Returns `true` for roles allowed to run admin-only operations.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin | Self::System)
    }
}

/// The authenticated caller `(user_id, club_id, role)`.
///
/// Supplied by the identity layer on every request. The `club_id` is the
/// only tenant key the engine ever trusts; tenant fields in request bodies
/// are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Caller's user id.
    pub user_id: UserId,
    /// Caller's club (tenant).
    pub club_id: ClubId,
    /// Caller's role within the club.
    pub role: Role,
}

impl Principal {
    /// Builds a principal.
    #[must_use]
    pub const fn new(user_id: UserId, club_id: ClubId, role: Role) -> Self {
        Self {
            user_id,
            club_id,
            role,
        }
    }

    /// Synthesised principal for jobs acting on behalf of the club itself.
    ///
    /// The nil user id marks system-owned rows (e.g. maintenance blocks).
    #[must_use]
    pub const fn system(club_id: ClubId) -> Self {
        Self {
            user_id: UserId::from_uuid(uuid::Uuid::nil()),
            club_id,
            role: Role::System,
        }
    }

    /// Returns `true` if this principal may run admin-only operations.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Returns `true` if this principal is the synthesised system principal.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self.role, Role::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_roles() {
        assert!(Role::Admin.is_admin());
        assert!(Role::SuperAdmin.is_admin());
        assert!(!Role::Member.is_admin());
        assert!(!Role::Staff.is_admin());
    }

    #[test]
    fn system_principal_is_admin_with_nil_user() {
        let p = Principal::system(ClubId::new());
        assert!(p.is_admin());
        assert!(p.is_system());
        assert!(p.user_id.as_uuid().is_nil());
    }

    #[test]
    fn role_serializes_screaming_snake() {
        let json = serde_json::to_string(&Role::SuperAdmin).unwrap_or_default();
        assert_eq!(json, "\"SUPER_ADMIN\"");
    }
}
