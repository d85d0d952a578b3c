//! Bearer-token principal resolution.
//!
//! Tokens have the shape `v1.<payload>.<signature>`, where `payload` is the
//! URL-safe base64 of the JSON claims and `signature` the URL-safe base64 of
//! an HMAC-SHA256 over `v1.<payload>`. Issuance lives with the identity
//! service; [`TokenVerifier::issue`] exists for tests and operator tooling.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::app_state::AppState;
use crate::domain::{ClubId, Principal, Role, UserId};
use crate::error::BookingError;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION: &str = "v1";
const MAX_TOKEN_LEN: usize = 2048;

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Authenticated user.
    pub user_id: UserId,
    /// Tenant the token is valid for.
    pub club_id: ClubId,
    /// Role inside the club.
    pub role: Role,
    /// Expiry as Unix seconds.
    pub exp: i64,
}

fn unauthorized(reason: &str) -> BookingError {
    BookingError::Unauthorized(reason.to_string())
}

/// Signs and verifies bearer tokens with a shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TokenVerifier {
    /// Creates a verifier for `secret`.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, BookingError> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| BookingError::Internal(format!("hmac key: {e}")))
    }

    /// Issues a token for `principal` expiring at `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Internal`] if the claims cannot be encoded.
    pub fn issue(
        &self,
        principal: &Principal,
        expires_at: DateTime<Utc>,
    ) -> Result<String, BookingError> {
        let claims = TokenClaims {
            user_id: principal.user_id,
            club_id: principal.club_id,
            role: principal.role,
            exp: expires_at.timestamp(),
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| BookingError::Internal(format!("encode claims: {e}")))?;
        let signed = format!("{TOKEN_VERSION}.{}", URL_SAFE_NO_PAD.encode(payload));
        let mut mac = self.mac()?;
        mac.update(signed.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{signed}.{sig}"))
    }

    /// Verifies `token` at instant `now` and returns its principal.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Unauthorized`] for malformed, forged, expired
    /// or system-role tokens.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, BookingError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(unauthorized("token too long"));
        }
        let mut parts = token.split('.');
        let (Some(version), Some(payload), Some(sig), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(unauthorized("malformed token"));
        };
        if version != TOKEN_VERSION {
            return Err(unauthorized("unsupported token version"));
        }

        let expected = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| unauthorized("malformed token signature"))?;
        let mut mac = self.mac()?;
        mac.update(version.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| unauthorized("token signature mismatch"))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| unauthorized("malformed token payload"))?;
        let claims: TokenClaims =
            serde_json::from_slice(&bytes).map_err(|_| unauthorized("malformed token claims"))?;

        if claims.exp <= now.timestamp() {
            return Err(unauthorized("token expired"));
        }
        if claims.role == Role::System {
            return Err(unauthorized("system role cannot be presented by clients"));
        }
        if claims.club_id.as_uuid().is_nil() {
            return Err(unauthorized("token carries no club"));
        }
        Ok(Principal::new(claims.user_id, claims.club_id, claims.role))
    }
}

/// Resolves the caller from `Authorization: Bearer <token>`.
impl FromRequestParts<AppState> for Principal {
    type Rejection = BookingError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| unauthorized("missing authorization header"))?;
        let token = header
            .strip_prefix("Bearer ")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| unauthorized("expected 'Bearer <token>'"))?;
        state.tokens.verify(token, Utc::now())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn principal(role: Role) -> Principal {
        Principal::new(UserId::new(), ClubId::new(), role)
    }

    #[test]
    fn issued_token_verifies() {
        let verifier = TokenVerifier::new("secret");
        let p = principal(Role::Admin);
        let now = Utc::now();
        let Ok(token) = verifier.issue(&p, now + Duration::hours(1)) else {
            panic!("issue failed");
        };
        let Ok(resolved) = verifier.verify(&token, now) else {
            panic!("verify failed");
        };
        assert_eq!(resolved, p);
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = TokenVerifier::new("secret");
        let now = Utc::now();
        let Ok(token) = verifier.issue(&principal(Role::Member), now - Duration::seconds(1)) else {
            panic!("issue failed");
        };
        assert!(matches!(
            verifier.verify(&token, now),
            Err(BookingError::Unauthorized(_))
        ));
    }

    #[test]
    fn forged_token_is_rejected() {
        let now = Utc::now();
        let Ok(token) =
            TokenVerifier::new("other").issue(&principal(Role::Admin), now + Duration::hours(1))
        else {
            panic!("issue failed");
        };
        assert!(TokenVerifier::new("secret").verify(&token, now).is_err());
    }

    #[test]
    fn system_role_is_never_accepted() {
        let verifier = TokenVerifier::new("secret");
        let now = Utc::now();
        let Ok(token) = verifier.issue(&principal(Role::System), now + Duration::hours(1)) else {
            panic!("issue failed");
        };
        assert!(verifier.verify(&token, now).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        let verifier = TokenVerifier::new("secret");
        let now = Utc::now();
        assert!(verifier.verify("", now).is_err());
        assert!(verifier.verify("v1.abc", now).is_err());
        assert!(verifier.verify("v2.abc.def", now).is_err());
        assert!(verifier.verify("v1.a.b.c", now).is_err());
    }
}
